//! In-memory [`DocumentStore`] and [`QueryTracker`] for tests and dry runs.
//!
//! Uses `HashMap` behind `std::sync::RwLock`; no lock is held across an
//! await point.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use policyharvest_shared::{
    CanonicalDocument, CanonicalDocumentDraft, Extension, PolicyHarvestError, QueryParams, Result,
};
use uuid::Uuid;

use crate::store::{DocumentStore, QueryTracker};

#[derive(Default)]
struct Inner {
    docs: HashMap<String, CanonicalDocument>,
    by_key: HashMap<(String, String), String>,
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    queries: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> PolicyHarvestError {
    PolicyHarvestError::Storage("memory store lock poisoned".into())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(
        &self,
        draft: &CanonicalDocumentDraft,
        extensions: &[Extension],
    ) -> Result<String> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let key = (draft.source.as_str().to_string(), draft.source_id.clone());

        let existing = inner.by_key.get(&key).cloned().or_else(|| {
            inner
                .docs
                .values()
                .find(|d| d.source == draft.source && d.content_fingerprint == draft.content_fingerprint)
                .map(|d| d.id.clone())
        });

        let id = match existing {
            Some(id) => {
                let (created_at, review_status, old_key) = match inner.docs.get(&id) {
                    Some(old) => (
                        old.created_at,
                        old.review_status,
                        (old.source.as_str().to_string(), old.source_id.clone()),
                    ),
                    None => (Utc::now(), Default::default(), key.clone()),
                };
                let mut doc = CanonicalDocument::from_draft(id.clone(), draft, extensions, created_at);
                doc.review_status = review_status;
                inner.by_key.remove(&old_key);
                inner.docs.insert(id.clone(), doc);
                id
            }
            None => {
                let id = Uuid::now_v7().to_string();
                let doc = CanonicalDocument::from_draft(id.clone(), draft, extensions, Utc::now());
                inner.docs.insert(id.clone(), doc);
                id
            }
        };
        inner.by_key.insert(key, id.clone());
        Ok(id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CanonicalDocument>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.docs.get(id).cloned())
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CanonicalDocument>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .docs
            .values()
            .find(|d| d.content_fingerprint == fingerprint)
            .cloned())
    }

    async fn count(&self) -> Result<u64> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.docs.len() as u64)
    }
}

#[async_trait]
impl QueryTracker for MemoryStore {
    async fn create_query(&self, _params: &QueryParams) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        self.queries
            .write()
            .map_err(|_| poisoned())?
            .insert(id.clone());
        Ok(id)
    }

    async fn query_exists(&self, id: &str) -> Result<bool> {
        Ok(self.queries.read().map_err(|_| poisoned())?.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::draft;

    #[tokio::test]
    async fn read_after_write() {
        let store = MemoryStore::new();
        let id = store.upsert(&draft("a", "text"), &[]).await.unwrap();
        let doc = store.find_by_id(&id).await.unwrap().expect("resolvable");
        assert_eq!(doc.id, id);
        assert_eq!(doc.schema_version, policyharvest_shared::CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn same_source_id_keeps_one_document() {
        let store = MemoryStore::new();
        let a = store.upsert(&draft("a", "one"), &[]).await.unwrap();
        let b = store.upsert(&draft("a", "two"), &[]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fingerprint_match_reuses_id() {
        let store = MemoryStore::new();
        let a = store.upsert(&draft("a", "same"), &[]).await.unwrap();
        let b = store.upsert(&draft("b", "same"), &[]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count().await.unwrap(), 1);
        // The old key no longer resolves to a stale entry.
        let c = store.upsert(&draft("a", "different"), &[]).await.unwrap();
        assert_ne!(a, c);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn queries_are_tracked() {
        let store = MemoryStore::new();
        let id = store.create_query(&QueryParams::default()).await.unwrap();
        assert!(store.query_exists(&id).await.unwrap());
    }
}
