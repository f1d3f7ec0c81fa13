//! Passage store adapter

use async_trait::async_trait;

use crate::{Passage, Result};

/// Read access to the passage corpus.
///
/// Passages are written by an external ingester; the core only reads. The
/// BM25 index is built from `scan` and refreshed through discrete
/// add/remove notifications.
#[async_trait]
pub trait PassageStore: Send + Sync {
    /// Fetch one passage by id. `Error::NotFound` if absent.
    async fn get(&self, id: &str) -> Result<Passage>;

    /// Load the full corpus for index construction
    async fn scan(&self) -> Result<Vec<Passage>>;
}
