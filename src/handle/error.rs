//! Errors raised by simulation handles.

use thiserror::Error;

/// Failures a handle raises while serving an access or call.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("no attribute named `{0}`")]
    UnknownAttribute(String),

    #[error("no method named `{0}`")]
    UnknownMethod(String),

    #[error("invalid arguments for `{method}`: {reason}")]
    InvalidArguments { method: String, reason: String },

    /// An argument had the right shape but an unacceptable value.
    #[error("ValueError: {0}")]
    Value(String),
}

impl HandleError {
    pub fn invalid_arguments(method: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}
