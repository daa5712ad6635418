//! Tracing setup shared by every `envproxy` subcommand.
//!
//! Logs always go to stderr: an isolated worker's stdout carries protocol
//! frames and must never see a log line.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::settings::LoggingSettings;

/// Install a stderr subscriber filtered by `RUST_LOG`, falling back to the
/// configured filter.
///
/// A second call is a no-op.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init();
}
