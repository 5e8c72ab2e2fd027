//! Error types for the realtime client.

use thiserror::Error;

/// Errors surfaced by the realtime channel and service.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Failed to establish the WebSocket connection
    #[error("Connection error: {0}")]
    Connect(String),

    /// The connect attempt did not complete within the configured timeout
    #[error("Connect attempt timed out after {0} ms")]
    ConnectTimeout(u64),
}

/// Errors from the push-notification bridge.
#[derive(Debug, Error)]
pub enum PushError {
    /// The platform messaging SDK refused or failed the permission request
    #[error("Push permission request failed: {0}")]
    Permission(String),

    /// The platform messaging SDK could not produce a device token
    #[error("Failed to obtain device token: {0}")]
    Token(String),

    /// The server rejected or failed the device-token registration
    #[error("Device token registration failed: {0}")]
    Registration(String),
}
