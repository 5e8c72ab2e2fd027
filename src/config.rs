//! Configuration for the realtime client.

use std::time::Duration;

/// Environment variable overriding the WebSocket endpoint URL
pub const ENV_WS_URL: &str = "CHAUTARI_WS_URL";
/// Environment variable overriding the REST API base URL
pub const ENV_API_URL: &str = "CHAUTARI_API_URL";

const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";
const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

/// Configuration for a [`RealtimeService`](crate::service::RealtimeService).
///
/// The defaults match the production client: give up after 5 reconnect
/// attempts, double a 1 second base delay between attempts, expire unread
/// in-app notifications after 5 seconds and typing indicators after 3
/// seconds, sweeping both once per second.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint URL
    pub ws_url: String,
    /// Base URL for REST calls (device-token registration)
    pub api_base_url: String,
    /// Whether to initialize the push-notification bridge
    pub enable_push_notifications: bool,
    /// Whether to route recognized events into the in-app notification store
    pub enable_in_app_notifications: bool,
    /// Maximum automatic reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential reconnect backoff
    pub base_reconnect_delay: Duration,
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Lifetime of an unread in-app notification
    pub notification_ttl: Duration,
    /// Lifetime of a typing indicator without a refresh
    pub typing_ttl: Duration,
    /// Interval between expiry sweeps
    pub sweep_interval: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_base_url: DEFAULT_API_URL.to_string(),
            enable_push_notifications: false,
            enable_in_app_notifications: true,
            max_reconnect_attempts: 5,
            base_reconnect_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(10),
            notification_ttl: Duration::from_millis(5000),
            typing_ttl: Duration::from_millis(3000),
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

impl RealtimeConfig {
    /// Build a configuration from the environment, falling back to defaults.
    ///
    /// Reads [`ENV_WS_URL`] and [`ENV_API_URL`] when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(ENV_WS_URL) {
            config.ws_url = url;
        }
        if let Ok(url) = std::env::var(ENV_API_URL) {
            config.api_base_url = url;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_production_constants() {
        // テスト項目: デフォルト設定が本番クライアントの定数と一致する
        // given (前提条件):

        // when (操作):
        let config = RealtimeConfig::default();

        // then (期待する結果):
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.base_reconnect_delay, Duration::from_millis(1000));
        assert_eq!(config.notification_ttl, Duration::from_millis(5000));
        assert_eq!(config.typing_ttl, Duration::from_millis(3000));
        assert_eq!(config.sweep_interval, Duration::from_millis(1000));
    }
}
