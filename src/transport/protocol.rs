//! Harness protocol message types.
//!
//! Newline-delimited JSON protocol between the parent test process and the
//! harness. Every line is one object whose `type` field selects the variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tagged::TaggedUnion;

/// Control message sent from the parent test process to the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InMessage {
    /// Stop the server and exit.
    Shutdown,
}

impl TaggedUnion for InMessage {
    const VARIANTS: &'static [&'static str] = &["shutdown"];

    fn variant(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
        }
    }
}

/// Status message sent from the harness to the parent test process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutMessage {
    /// Free-form progress text.
    Log { message: String },
    /// Failure detail. Sent once before a non-zero exit.
    Error { message: String },
    /// The server is up and accepting connections.
    Ready,
    /// Arbitrary JSON document for the test to inspect.
    Payload { payload: Value },
}

impl OutMessage {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wrap any serializable value as a `Payload` message.
    pub fn payload<P: Serialize>(payload: &P) -> serde_json::Result<Self> {
        Ok(Self::Payload {
            payload: serde_json::to_value(payload)?,
        })
    }
}

impl TaggedUnion for OutMessage {
    const VARIANTS: &'static [&'static str] = &["log", "error", "ready", "payload"];

    fn variant(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Error { .. } => "error",
            Self::Ready => "ready",
            Self::Payload { .. } => "payload",
        }
    }
}
