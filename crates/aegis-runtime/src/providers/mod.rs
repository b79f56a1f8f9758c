//! Model backends for the enhanced analysis strategy.
//!
//! A backend answers one kind of question: given fixed instructions and a
//! task, produce a JSON document. Parsing that document into marketplace
//! types stays with the strategy. The Gemini backend is behind the
//! `gemini` feature.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProviderSettings;

#[cfg(feature = "gemini")]
mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::{ApiKey, GeminiProvider, GEMINI_API_KEY_ENV};

/// Why a model could not produce an answer.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("model unreachable: {0}")]
    Unreachable(String),

    #[error("model timed out after {0:?}")]
    TimedOut(Duration),

    #[error("model rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("model rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("model returned no answer: {0}")]
    NoAnswer(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

/// A request for a JSON answer.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPrompt {
    /// Standing rules, sent as the system instruction
    pub instructions: &'static str,

    /// The question, the expected answer shape and the request payload
    pub task: String,
}

/// Raw answer text. It should hold one JSON document but may still be
/// wrapped in prose or code fences.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonAnswer {
    pub text: String,
    pub model: String,
    pub tokens: u32,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Name for logs and metrics.
    fn name(&self) -> &str;

    async fn complete_json(
        &self,
        prompt: &JsonPrompt,
        settings: &ProviderSettings,
    ) -> Result<JsonAnswer, ProviderError>;
}
