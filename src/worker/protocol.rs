//! Protocol types for worker communication.
//!
//! The protocol is strictly half-duplex: the controller sends one `Access` or
//! `Call`, the worker answers with exactly one `Result` or `Exception`, and only
//! then may the next request go out. There are no request IDs.
//!
//! On a process boundary each message travels as one line of JSON (NDJSON).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Message Envelope
// ============================================================================

/// A single unit exchanged over the worker channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// Read a named attribute off the simulation handle.
    Access(String),
    /// Invoke a named method on the simulation handle.
    Call(CallPayload),
    /// Return value of an access or call.
    Result(Value),
    /// Formatted failure trace raised inside the worker.
    Exception(String),
    /// Ask the worker to leave its loop. Never answered.
    Close,
}

/// Method name plus positional and keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    /// Method name (e.g., "step").
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CallPayload {
    /// Create a call with positional arguments only.
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
            kwargs: Map::new(),
        }
    }

    /// Attach keyword arguments.
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }
}

/// Discriminant of a [`Message`], used in logs and protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Access,
    Call,
    Result,
    Exception,
    Close,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Access => "access",
            MessageKind::Call => "call",
            MessageKind::Result => "result",
            MessageKind::Exception => "exception",
            MessageKind::Close => "close",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// Shorthand for a call message.
    pub fn call(method: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Message::Call(CallPayload::new(method, args).with_kwargs(kwargs))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Access(_) => MessageKind::Access,
            Message::Call(_) => MessageKind::Call,
            Message::Result(_) => MessageKind::Result,
            Message::Exception(_) => MessageKind::Exception,
            Message::Close => MessageKind::Close,
        }
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Encode a message as one newline-terminated JSON line.
pub fn encode_frame(message: &Message) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line produced by [`encode_frame`].
pub fn decode_frame(line: &str) -> Result<Message, serde_json::Error> {
    serde_json::from_str(line.trim_end_matches(['\n', '\r']))
}

// ============================================================================
// Attribute and Method Names
// ============================================================================

/// Attribute names the proxy caches after the first successful read.
pub mod attributes {
    pub const OBSERVATION_SPACE: &str = "observation_space";
    pub const ACTION_SPACE: &str = "action_space";
}

/// Method names driving the control loop.
pub mod methods {
    pub const STEP: &str = "step";
    pub const RESET: &str = "reset";
    pub const RENDER: &str = "render";
    pub const CLOSE: &str = "close";
}
