//! Shared deterministic types for the agent loop.
//!
//! These types define stable contracts between the runtime, the agents and the
//! code runners. They carry no I/O and are cheap to clone.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A message exchanged on the bus. Routing is purely topic-based, so the
/// message itself carries nothing but its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
}

impl Message {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Name under which a handler is registered with the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Topic that deliveries are routed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId(String);

impl TopicId {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TopicId {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A published message together with its routing metadata.
///
/// `sender` is `None` for messages injected from outside the runtime (the
/// human task or feedback).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: TopicId,
    pub sender: Option<AgentId>,
    pub message: Message,
}

/// One entry of a generator's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationTurn {
    System { content: String, source: String },
    User { content: String, source: String },
    Assistant { content: String, source: String },
}

impl ConversationTurn {
    pub fn content(&self) -> &str {
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Assistant { content, .. } => content,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Self::System { source, .. }
            | Self::User { source, .. }
            | Self::Assistant { source, .. } => source,
        }
    }
}

/// Outcome classification of one code execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Classified result of running one extracted code block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub text: String,
}

impl ExecutionResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ExecutionStatus::Error
    }

    /// Text published back onto the bus for the generator to react to.
    pub fn render(&self) -> String {
        match self.status {
            ExecutionStatus::Success => format!("Success:\n{}", self.text),
            ExecutionStatus::Error => format!("Error:\n{}", self.text),
        }
    }
}
