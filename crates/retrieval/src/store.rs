//! In-memory passage store
//!
//! Backing store for tests and single-process deployments. Production
//! deployments implement [`PassageStore`] over their own storage; the core
//! only depends on the trait.

use async_trait::async_trait;
use dashmap::DashMap;

use ragpipe_core::{Error, Passage, PassageStore, Result};

/// Concurrent in-memory passage store
#[derive(Default)]
pub struct InMemoryPassageStore {
    passages: DashMap<String, Passage>,
}

impl InMemoryPassageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one passage
    pub fn insert(&self, passage: Passage) {
        self.passages.insert(passage.id.clone(), passage);
    }

    /// Insert or replace many passages
    pub fn insert_all(&self, passages: Vec<Passage>) {
        for passage in passages {
            self.insert(passage);
        }
    }

    /// Remove a passage by id
    pub fn remove(&self, id: &str) -> Option<Passage> {
        self.passages.remove(id).map(|(_, passage)| passage)
    }

    /// Number of stored passages
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

#[async_trait]
impl PassageStore for InMemoryPassageStore {
    async fn get(&self, id: &str) -> Result<Passage> {
        self.passages
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("passage '{id}'")))
    }

    async fn scan(&self) -> Result<Vec<Passage>> {
        Ok(self
            .passages
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_and_scan() {
        let store = InMemoryPassageStore::new();
        store.insert(Passage::new("c1", "d1", "text one", 0));
        store.insert(Passage::new("c2", "d1", "text two", 1));

        let passage = store.get("c1").await.unwrap();
        assert_eq!(passage.text, "text one");

        let all = store.scan().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_passage_is_not_found() {
        let store = InMemoryPassageStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
