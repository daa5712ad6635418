//! Configuration module for envproxy.
//!
//! Handles the settings file, environment variable expansion and logging setup.

mod logging;
mod settings;

pub use logging::init_logging;
pub use settings::{expand_env_vars, LoggingSettings, Settings, SettingsError, WorkerSettings};
