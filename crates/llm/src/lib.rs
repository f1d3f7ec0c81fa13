//! Language model adapter
//!
//! Implements [`ragpipe_core::LanguageModel`] against an OpenAI-compatible
//! chat completions endpoint, with retry and backoff for transient
//! failures. Prompt templates used by the analyzer and the attribution
//! enhancer live in [`prompt`].

pub mod backend;
pub mod prompt;

pub use backend::HttpLanguageModel;

use thiserror::Error;

/// LLM adapter errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request error: {0}")]
    Request(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("model returned malformed JSON: {0}")]
    MalformedJson(String),
}

impl From<LlmError> for ragpipe_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(msg) => ragpipe_core::Error::AdapterTimeout(msg),
            LlmError::Request(msg)
            | LlmError::Response(msg)
            | LlmError::MalformedJson(msg) => ragpipe_core::Error::AdapterUnavailable(msg),
        }
    }
}
