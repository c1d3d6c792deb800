//! Chat completion for triage analysis
//!
//! Provider-agnostic wrapper over the supported chat APIs. The provider set
//! is closed; selection happens at construction and every completion records
//! token usage for the metrics counters.

pub mod client;

pub use client::ChatClient;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    /// Provider rejected the request
    #[error("LLM API error: {0}")]
    Api(String),

    /// Configuration error
    #[error("LLM configuration error: {0}")]
    Config(String),

    /// Network error
    #[error("LLM network error: {0}")]
    Network(String),

    /// Response body did not parse
    #[error("LLM serialization error: {0}")]
    Serialization(String),

    /// Retries exhausted; the provider is treated as down
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Chat provider options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatProvider {
    Gemini,
    Anthropic,
    /// Canned completions for tests and local smoke runs
    Mock,
}

impl ChatProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatProvider::Gemini => "gemini",
            ChatProvider::Anthropic => "anthropic",
            ChatProvider::Mock => "mock",
        }
    }
}

/// One message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A completion plus its token accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub provider_id: String,
}
