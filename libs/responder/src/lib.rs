//! Automated reply generation.
//!
//! A [`Responder`] turns a conversation window plus retrieved knowledge into reply text. The
//! production implementation talks to an OpenAI-compatible chat-completions endpoint; tests use
//! [`StaticResponder`].

mod config;
mod knowledge;
mod openai;
mod prompt;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use csd_core::{Message, MessageRole};
use serde::Serialize;
use thiserror::Error;

pub use config::ResponderConfig;
pub use knowledge::{KnowledgeBase, KnowledgeEntry, TenantKnowledge, score_entry, tokenize};
pub use openai::OpenAiResponder;
pub use prompt::{DEFAULT_SYSTEM_TEMPLATE, PromptContext, PromptRenderer};

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("responder request timed out")]
    Timeout,
    #[error("responder rejected credentials")]
    Unauthorized,
    #[error("responder rate limited")]
    RateLimited,
    #[error("responder returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("responder transport error: {0}")]
    Transport(String),
    #[error("responder returned malformed payload: {0}")]
    Malformed(String),
    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

impl ResponderError {
    /// Short label for logs and metric tags.
    pub fn kind(&self) -> &'static str {
        match self {
            ResponderError::Timeout => "timeout",
            ResponderError::Unauthorized => "unauthorized",
            ResponderError::RateLimited => "rate_limited",
            ResponderError::Http { .. } => "http",
            ResponderError::Transport(_) => "transport",
            ResponderError::Malformed(_) => "malformed",
            ResponderError::Prompt(_) => "prompt",
        }
    }
}

/// One prior turn handed to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub system_prompt: String,
    pub knowledge_context: String,
    pub history: Vec<ChatTurn>,
    pub user_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutput {
    pub text: String,
    /// Tokens reported by the backend, when it reports any.
    pub tokens: Option<u64>,
}

#[async_trait]
pub trait Responder: Send + Sync {
    async fn generate_reply(&self, request: ReplyRequest) -> Result<ReplyOutput, ResponderError>;
}

pub type SharedResponder = Arc<dyn Responder>;

/// Replies with fixed text, or with a fixed failure. Records every request it sees.
#[derive(Default)]
pub struct StaticResponder {
    reply: Option<String>,
    calls: AtomicUsize,
    last_request: std::sync::Mutex<Option<ReplyRequest>>,
}

impl StaticResponder {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
            ..Default::default()
        }
    }

    /// A responder whose every call fails as if the backend rejected the credentials.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ReplyRequest> {
        self.last_request
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl Responder for StaticResponder {
    async fn generate_reply(&self, request: ReplyRequest) -> Result<ReplyOutput, ResponderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some(request);
        }
        match &self.reply {
            Some(text) => Ok(ReplyOutput {
                text: text.clone(),
                tokens: None,
            }),
            None => Err(ResponderError::Unauthorized),
        }
    }
}

/// Token estimate used when the backend reports no usage: about four characters per token.
///
/// ```
/// assert_eq!(csd_responder::estimate_tokens("abcdefgh"), 2);
/// assert_eq!(csd_responder::estimate_tokens("abc"), 1);
/// ```
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ReplyRequest {
        ReplyRequest {
            system_prompt: "sys".into(),
            knowledge_context: String::new(),
            history: Vec::new(),
            user_message: "hi".into(),
        }
    }

    #[tokio::test]
    async fn static_responder_records_calls() {
        let responder = StaticResponder::replying("hello");
        let out = responder.generate_reply(request()).await.unwrap();
        assert_eq!(out.text, "hello");
        assert_eq!(responder.calls(), 1);
        assert_eq!(responder.last_request().unwrap().user_message, "hi");
    }

    #[tokio::test]
    async fn failing_responder_errors() {
        let responder = StaticResponder::failing();
        let err = responder.generate_reply(request()).await.unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
    }
}
