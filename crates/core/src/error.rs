//! Error taxonomy for the retrieval core
//!
//! Adapter failures are contained inside the stage that owns them and
//! degrade to empty results; only validation and deadline errors reach the
//! caller.

use thiserror::Error;

/// Retrieval core errors
#[derive(Error, Debug)]
pub enum Error {
    /// An external dependency is down. Stages substitute locally (skip
    /// reranking, keep the heuristic classification, return an empty
    /// branch); this never propagates to the caller.
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// An external dependency exceeded its per-adapter timeout. Counted
    /// separately from unavailability in metrics.
    #[error("adapter timeout: {0}")]
    AdapterTimeout(String),

    /// Malformed caller input (k = 0, invalid filter shape, empty query).
    /// Surfaced to the caller.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A referenced passage id has no content in the passage store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The per-request deadline expired. Surfaced to the caller together
    /// with whatever partial results were assembled.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Unexpected failure. The affected request fails; others are
    /// unaffected.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error must be surfaced to the caller instead of being
    /// absorbed by the owning stage.
    pub fn is_caller_visible(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::DeadlineExceeded)
    }

    /// Whether this error represents an adapter-side failure.
    pub fn is_adapter_failure(&self) -> bool {
        matches!(self, Error::AdapterUnavailable(_) | Error::AdapterTimeout(_))
    }
}

/// Result type alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;
