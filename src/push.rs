//! Push notification bridge.
//!
//! Optional secondary delivery route for when the app is backgrounded.
//! The platform messaging SDK sits behind [`PushProvider`]; on granted
//! permission the bridge registers the device token with the server and
//! translates foreground push payloads into the same [`InAppNotification`]
//! shape the channel path produces, so UI consumers see one unified model
//! regardless of delivery route.
//!
//! Permission denial and registration failure are non-fatal: the bridge
//! simply stays inactive and channel-based delivery keeps working.

use std::sync::Mutex;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PushError;
use crate::notifications::{InAppNotification, NotificationKind};

/// Outcome of a platform permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPermission {
    Granted,
    Denied,
}

/// Platform messaging SDK abstraction (permission prompt + device token)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Ask the platform for notification permission
    async fn request_permission(&self) -> Result<PushPermission, PushError>;

    /// Obtain the device token for server-side push delivery
    async fn device_token(&self) -> Result<String, PushError>;
}

/// Foreground push payload as delivered by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Convert a foreground push payload into an in-app notification record.
///
/// Push-delivered alerts always render as informational; priority only
/// exists on the channel path.
pub fn notification_from_push(payload: &PushPayload, now_millis: i64) -> InAppNotification {
    InAppNotification::new(
        payload.title.clone(),
        payload.body.clone(),
        NotificationKind::Info,
        payload.action_url.clone(),
        now_millis,
    )
}

/// Registers the device for platform push delivery.
pub struct PushBridge {
    http: reqwest::Client,
    api_base_url: String,
    device_token: Mutex<Option<String>>,
}

impl PushBridge {
    /// Create an inactive bridge pointing at the given REST base URL
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: api_base_url.into(),
            device_token: Mutex::new(None),
        }
    }

    /// Request permission, obtain a device token, and register it.
    ///
    /// Returns `Ok(false)` when permission was denied (the bridge stays
    /// inactive), `Ok(true)` when the token was registered. Token and
    /// registration failures surface as errors for the caller to log;
    /// they leave the bridge inactive.
    pub async fn initialize(
        &self,
        provider: &dyn PushProvider,
        bearer_token: Option<&str>,
    ) -> Result<bool, PushError> {
        match provider.request_permission().await? {
            PushPermission::Denied => {
                tracing::info!("Push permission denied; bridge stays inactive");
                Ok(false)
            }
            PushPermission::Granted => {
                let token = provider.device_token().await?;
                self.register_token(&token, bearer_token).await?;
                *self.device_token.lock().expect("push lock poisoned") = Some(token);
                tracing::info!("Device token registered for push delivery");
                Ok(true)
            }
        }
    }

    /// Whether a device token has been registered
    pub fn is_active(&self) -> bool {
        self.device_token
            .lock()
            .expect("push lock poisoned")
            .is_some()
    }

    /// The registered device token, when active
    pub fn device_token(&self) -> Option<String> {
        self.device_token
            .lock()
            .expect("push lock poisoned")
            .clone()
    }

    async fn register_token(
        &self,
        token: &str,
        bearer_token: Option<&str>,
    ) -> Result<(), PushError> {
        let url = format!("{}/api/v1/notifications/fcm-token", self.api_base_url);
        let mut request = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "token": token }));
        if let Some(bearer) = bearer_token {
            request = request.bearer_auth(bearer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Registration(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| PushError::Registration(e.to_string()))?;
        Ok(())
    }
}
