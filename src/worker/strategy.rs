//! Execution strategies and the command that launches process workers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::error::{WorkerError, WorkerResult};

/// Where a proxied environment runs. Fixed for the lifetime of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// In the caller's own flow of control, no channel, no isolation.
    #[serde(alias = "none")]
    Inline,
    /// On a task in the same process; shares memory and the caller's fate.
    #[serde(alias = "thread", alias = "shared")]
    SharedProcess,
    /// In a child process; a crash there only breaks the channel.
    #[default]
    #[serde(alias = "process", alias = "isolated")]
    IsolatedProcess,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Inline => "inline",
            ExecutionStrategy::SharedProcess => "shared_process",
            ExecutionStrategy::IsolatedProcess => "isolated_process",
        }
    }

    /// Whether a worker loop and channel are involved.
    pub fn uses_worker(&self) -> bool {
        !matches!(self, ExecutionStrategy::Inline)
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inline" | "none" => Ok(ExecutionStrategy::Inline),
            "shared_process" | "shared" | "thread" => Ok(ExecutionStrategy::SharedProcess),
            "isolated_process" | "isolated" | "process" => Ok(ExecutionStrategy::IsolatedProcess),
            other => Err(format!(
                "unsupported strategy: {}. Supported: inline, shared_process, isolated_process",
                other
            )),
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Program that serves an environment over stdin/stdout when invoked as
/// `<program> <args..> worker --env <name> --poll-interval-ms <ms>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// The running executable, which must dispatch the `worker` subcommand.
    pub fn current_exe() -> WorkerResult<Self> {
        std::env::current_exe()
            .map(Self::new)
            .map_err(WorkerError::SpawnFailed)
    }

    /// Add an argument placed before the `worker` subcommand.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument list for serving `env`.
    pub fn worker_args(&self, env: &str, poll_interval: Duration) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "worker".to_string(),
            "--env".to_string(),
            env.to_string(),
            "--poll-interval-ms".to_string(),
            poll_interval.as_millis().to_string(),
        ]);
        args
    }

    /// Build the child command with piped stdin/stdout and inherited stderr.
    pub(crate) fn command(&self, env: &str, poll_interval: Duration) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.worker_args(env, poll_interval))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("none".parse::<ExecutionStrategy>().unwrap(), ExecutionStrategy::Inline);
        assert_eq!(
            "thread".parse::<ExecutionStrategy>().unwrap(),
            ExecutionStrategy::SharedProcess
        );
        assert_eq!(
            "Process".parse::<ExecutionStrategy>().unwrap(),
            ExecutionStrategy::IsolatedProcess
        );
        assert!("fork".parse::<ExecutionStrategy>().is_err());
    }

    #[test]
    fn test_strategy_serde_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: ExecutionStrategy,
        }
        let parsed: Wrapper = toml::from_str(r#"strategy = "thread""#).unwrap();
        assert_eq!(parsed.strategy, ExecutionStrategy::SharedProcess);
        let parsed: Wrapper = toml::from_str(r#"strategy = "inline""#).unwrap();
        assert_eq!(parsed.strategy, ExecutionStrategy::Inline);
    }

    #[test]
    fn test_default_strategy_is_isolated() {
        assert_eq!(ExecutionStrategy::default(), ExecutionStrategy::IsolatedProcess);
        assert!(ExecutionStrategy::default().uses_worker());
        assert!(!ExecutionStrategy::Inline.uses_worker());
    }

    #[test]
    fn test_worker_args() {
        let command = WorkerCommand::new("/usr/local/bin/envproxy").arg("--quiet");
        assert_eq!(
            command.worker_args("counter", Duration::from_millis(100)),
            vec!["--quiet", "worker", "--env", "counter", "--poll-interval-ms", "100"]
        );
        assert_eq!(command.program(), Path::new("/usr/local/bin/envproxy"));
    }
}
