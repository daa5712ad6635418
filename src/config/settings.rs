//! TOML-based configuration for envproxy.
//!
//! Supports a config file (envproxy.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [worker]
//! strategy = "process"          # inline | shared_process | isolated_process
//! path = "${HOME}/bin/envproxy" # program serving `worker --env <name>`
//! args = []
//! poll_interval_ms = 100
//!
//! [logging]
//! filter = "envproxy=debug,info"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::worker::{ExecutionStrategy, WorkerCommand, POLL_INTERVAL};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Worker configuration.
    pub worker: WorkerSettings,

    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Execution strategy for new proxies.
    pub strategy: ExecutionStrategy,

    /// Program serving isolated workers (defaults to the current executable).
    pub path: Option<String>,

    /// Arguments placed before the `worker` subcommand.
    pub args: Vec<String>,

    /// How long a worker waits for a message before checking for interrupts.
    pub poll_interval_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            path: None,
            args: Vec::new(),
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `ENVPROXY_CONFIG`
    /// 2. `./envproxy.toml`
    /// 3. `~/.config/envproxy/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("ENVPROXY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("envproxy.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("envproxy").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }

    /// Reject values no worker could run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.worker.poll_interval_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "worker.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(path) = &self.worker.path {
            if path.trim().is_empty() {
                return Err(SettingsError::InvalidConfig(
                    "worker.path must not be empty".to_string(),
                ));
            }
            expand_env_vars(path)?;
        }
        Ok(())
    }

    /// Configured worker program, if any, with environment variables expanded.
    ///
    /// Returns `None` when no path is set; callers then fall back to the
    /// current executable.
    pub fn worker_command(&self) -> Result<Option<WorkerCommand>, SettingsError> {
        let Some(path) = &self.worker.path else {
            return Ok(None);
        };
        let expanded = expand_env_vars(path)?;
        Ok(Some(
            WorkerCommand::new(expanded).args(self.worker.args.iter().cloned()),
        ))
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_braces() {
        env::set_var("ENVPROXY_TEST_VAR", "hello");
        assert_eq!(expand_env_vars("${ENVPROXY_TEST_VAR}").unwrap(), "hello");
        assert_eq!(
            expand_env_vars("prefix_${ENVPROXY_TEST_VAR}_suffix").unwrap(),
            "prefix_hello_suffix"
        );
        env::remove_var("ENVPROXY_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        env::set_var("ENVPROXY_TEST_VAR2", "world");
        assert_eq!(expand_env_vars("$ENVPROXY_TEST_VAR2").unwrap(), "world");
        assert_eq!(expand_env_vars("$ENVPROXY_TEST_VAR2!").unwrap(), "world!");
        assert_eq!(expand_env_vars("cost: 5$").unwrap(), "cost: 5$");
        env::remove_var("ENVPROXY_TEST_VAR2");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("${NONEXISTENT_VAR_12345}");
        assert!(matches!(result, Err(SettingsError::MissingEnvVar(name)) if name == "NONEXISTENT_VAR_12345"));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[worker]
strategy = "thread"
path = "/opt/envproxy/bin/envproxy"
args = ["--quiet"]
poll_interval_ms = 50

[logging]
filter = "envproxy=debug"
"#;

        let settings = Settings::from_toml_str(toml).unwrap();

        assert_eq!(settings.worker.strategy, ExecutionStrategy::SharedProcess);
        assert_eq!(settings.worker.poll_interval(), Duration::from_millis(50));
        assert_eq!(settings.logging.filter, "envproxy=debug");

        let command = settings.worker_command().unwrap().unwrap();
        assert_eq!(command.program(), Path::new("/opt/envproxy/bin/envproxy"));
        assert_eq!(
            command.worker_args("counter", settings.worker.poll_interval())[0],
            "--quiet"
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.worker.strategy, ExecutionStrategy::IsolatedProcess);
        assert_eq!(settings.worker.poll_interval(), POLL_INTERVAL);
        assert!(settings.worker_command().unwrap().is_none());
        assert_eq!(settings.logging.filter, "info");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.worker.poll_interval_ms, 100);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let result = Settings::from_toml_str("[worker]\npoll_interval_ms = 0\n");
        assert!(matches!(result, Err(SettingsError::InvalidConfig(_))));
    }

    #[test]
    fn test_unset_variable_in_worker_path_rejected() {
        let toml = "[worker]\npath = \"${ENVPROXY_UNSET_WORKER_DIR}/envproxy\"\n";
        assert!(matches!(
            Settings::from_toml_str(toml),
            Err(SettingsError::MissingEnvVar(name)) if name == "ENVPROXY_UNSET_WORKER_DIR"
        ));

        let mut settings = Settings::default();
        settings.worker.path = Some("${ENVPROXY_UNSET_WORKER_DIR}/envproxy".to_string());
        assert!(matches!(
            settings.worker_command(),
            Err(SettingsError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = Settings::from_toml_str("[worker]\nstrategy = \"fork\"\n");
        assert!(matches!(result, Err(SettingsError::ParseError(_))));
    }

    #[test]
    fn test_from_file() {
        let path = env::temp_dir().join(format!("envproxy-settings-{}.toml", std::process::id()));
        fs::write(&path, "[worker]\nstrategy = \"none\"\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.worker.strategy, ExecutionStrategy::Inline);

        fs::remove_file(&path).unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(SettingsError::FileNotFound(_))
        ));
    }
}
