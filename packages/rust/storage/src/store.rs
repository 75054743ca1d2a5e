//! Store contracts consumed by the ingestion pipeline.

use async_trait::async_trait;
use policyharvest_shared::{CanonicalDocument, CanonicalDocumentDraft, Extension, QueryParams, Result};

/// Idempotent persistence for canonical documents.
///
/// `upsert` is keyed by `(source, source_id)` and falls back to the content
/// fingerprint, so re-ingesting the same document never creates a second
/// row. An id returned by `upsert` must be resolvable by `find_by_id`
/// immediately afterwards.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(&self, draft: &CanonicalDocumentDraft, extensions: &[Extension])
    -> Result<String>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CanonicalDocument>>;

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CanonicalDocument>>;

    async fn count(&self) -> Result<u64>;
}

/// Query-tracking ids that tie documents from several steps to one request.
#[async_trait]
pub trait QueryTracker: Send + Sync {
    async fn create_query(&self, params: &QueryParams) -> Result<String>;

    async fn query_exists(&self, id: &str) -> Result<bool>;
}
