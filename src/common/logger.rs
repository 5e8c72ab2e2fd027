//! Logging setup for the realtime client.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive covering the library crate and the binary.
fn default_filter(binary_name: &str, level: &str) -> String {
    let lib_target = env!("CARGO_PKG_NAME").replace('-', "_");
    if binary_name == lib_target {
        format!("{}={}", lib_target, level)
    } else {
        format!("{}={},{}={}", lib_target, level, binary_name, level)
    }
}

/// Initialize the tracing subscriber.
///
/// Logs from this crate and from `binary_name` are emitted at
/// `default_log_level`; everything else stays quiet. `RUST_LOG` overrides
/// the whole filter when set.
///
/// # Examples
///
/// ```no_run
/// use chautari::common::logger::setup_logger;
///
/// setup_logger("client", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
