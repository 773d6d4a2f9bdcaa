//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use storyloom_core::config::GeneralConfig;

/// Boxed error returned when a global subscriber is already installed.
pub type TelemetryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides `general.log_level`. Logs go to stderr so the
/// interactive loop keeps stdout to itself.
///
/// # Errors
///
/// Returns an error if a global subscriber was already set.
pub fn init_tracing(config: &GeneralConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
