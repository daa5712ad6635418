//! Worker-specific error types.

use std::io;
use thiserror::Error;

use super::protocol::MessageKind;
use crate::config::SettingsError;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur during worker communication.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Failed to wait for the worker process to exit.
    #[error("failed to join worker process: {0}")]
    JoinFailed(#[source] io::Error),

    /// Failed to serialize an outgoing message.
    #[error("failed to serialize message: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Failed to deserialize a result into the requested type.
    #[error("failed to deserialize result: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// The peer endpoint of the channel is gone.
    #[error("channel closed by peer")]
    ChannelClosed,

    /// The channel broke instead of delivering a response.
    #[error("environment worker crashed")]
    WorkerCrashed,

    /// The simulation handle (or its factory) raised inside the worker.
    #[error("environment raised an exception:\n{trace}")]
    Raised {
        /// Formatted failure trace captured in the worker.
        trace: String,
    },

    /// The zero-argument factory failed during inline construction.
    #[error("failed to construct environment:\n{0}")]
    Factory(String),

    /// A message arrived that the protocol does not allow at that position.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A request was issued while an earlier one is still unanswered.
    #[error("a request is already outstanding on this proxy; resolve the pending promise first")]
    RequestOutstanding,

    /// The proxy has already been closed.
    #[error("proxy is closed")]
    Closed,

    /// No factory is registered under this name.
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// An isolated worker was asked to run a factory it cannot rebuild.
    #[error("environment `{0}` was not taken from a registry; an isolated worker can only rebuild registered environments")]
    Unregistered(String),

    /// The worker settings could not be turned into a command.
    #[error("invalid worker configuration: {0}")]
    Config(#[from] SettingsError),
}

impl WorkerError {
    /// Create a protocol error for a message of unexpected kind.
    pub fn unexpected(kind: MessageKind) -> Self {
        Self::Protocol(format!("received message of unexpected type `{}`", kind))
    }

    /// Create an error carrying a trace raised inside the worker.
    pub fn raised(trace: impl Into<String>) -> Self {
        Self::Raised {
            trace: trace.into(),
        }
    }

    /// Check if this error indicates the worker has died without a trace.
    pub fn is_worker_crashed(&self) -> bool {
        matches!(self, Self::WorkerCrashed | Self::ChannelClosed)
    }

    /// Check if this error carries a trace from the simulation handle.
    pub fn is_raised(&self) -> bool {
        matches!(self, Self::Raised { .. } | Self::Factory(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raised_keeps_trace_text() {
        let err = WorkerError::raised("ValueError: invalid action on step 3");
        assert!(err.to_string().contains("ValueError: invalid action on step 3"));
        assert!(err.is_raised());
        assert!(!err.is_worker_crashed());
    }

    #[test]
    fn test_crash_is_distinct() {
        let err = WorkerError::WorkerCrashed;
        assert_eq!(err.to_string(), "environment worker crashed");
        assert!(err.is_worker_crashed());
        assert!(!err.is_raised());
    }

    #[test]
    fn test_unexpected_kind() {
        let err = WorkerError::unexpected(MessageKind::Close);
        assert!(matches!(err, WorkerError::Protocol(_)));
        assert!(err.to_string().contains("`close`"));
    }
}
