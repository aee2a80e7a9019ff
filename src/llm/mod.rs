//! LLM client abstraction.
//!
//! Every capability that needs a model goes through [`LlmClient`], so tests
//! can swap the hosted Gemini backend for a scripted fake.

mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM response could not be decoded: {0}")]
    Decode(String),
}

impl LlmError {
    /// Whether a second attempt has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::Timeout => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::EmptyResponse | LlmError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else if e.is_decode() {
            LlmError::Decode(e.to_string())
        } else {
            LlmError::Transport(e.to_string())
        }
    }
}

/// One piece of a multimodal prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(text.into())
    }
}

/// A text-completion / vision service.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one user turn made of `parts` and return the model's text reply.
    async fn generate(&self, parts: &[ContentPart]) -> Result<String, LlmError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted LLM used across the crate's tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns queued replies in order and records every prompt it saw.
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        pub prompts: Mutex<Vec<Vec<ContentPart>>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().expect("prompts lock").len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, parts: &[ContentPart]) -> Result<String, LlmError> {
            self.prompts
                .lock()
                .expect("prompts lock")
                .push(parts.to_vec());
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Transport("reset".to_string()).is_transient());
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(LlmError::Status {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(!LlmError::Status {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!LlmError::EmptyResponse.is_transient());
    }
}
