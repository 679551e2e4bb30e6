use anyhow::{anyhow, Result};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion model. Implementations must be safe to share across
/// concurrent callers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Free-form completion.
    async fn complete(&self, messages: Vec<Message>) -> Result<String>;

    /// JSON-mode completion. The returned string is expected to parse as
    /// JSON; callers validate against their own schema.
    async fn complete_json(&self, messages: Vec<Message>) -> Result<String>;
}

/// Model used when no LLM is configured. Every call fails so that
/// callers exercise their deterministic fallbacks.
pub struct NoopModel;

#[async_trait]
impl ChatModel for NoopModel {
    async fn complete(&self, _messages: Vec<Message>) -> Result<String> {
        Err(anyhow!("no LLM configured"))
    }

    async fn complete_json(&self, _messages: Vec<Message>) -> Result<String> {
        Err(anyhow!("no LLM configured"))
    }
}
