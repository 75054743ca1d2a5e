//! Source adapters: the per-source ingestion contract and its implementations.
//!
//! Every external source implements [`SourceAdapter`], a staged contract
//! (`discover → acquire → extract → map → extensions → validate → persist`)
//! parameterized by the source's own extracted type. [`run_pipeline`] drives
//! one discovery record through the stages in order; [`AdapterPipeline`]
//! erases the extracted type so the orchestrator can hold adapters in an
//! [`AdapterRegistry`] keyed by [`DocumentSource`].

pub mod citations;
pub mod crawl_index;
mod html;
mod http;
pub mod judiciary;
pub mod municipal;
pub mod official_publications;
mod registry;
mod xml;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use policyharvest_shared::{
    ArtifactRef, CanonicalDocumentDraft, DocumentSource, EnrichmentMetadata, Extension,
    Provenance, QueryParams, Result, sha256_hex, validate_draft,
};
use policyharvest_storage::DocumentStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub use crawl_index::CrawlIndexAdapter;
pub use judiciary::JudiciaryAdapter;
pub use municipal::MunicipalAdapter;
pub use official_publications::OfficialPublicationsAdapter;
pub use registry::AdapterRegistry;

/// Separator between a title and its publication number in supplied titles.
pub const TITLE_NUMBER_SEPARATOR: char = '|';

// ---------------------------------------------------------------------------
// Stage inputs and outputs
// ---------------------------------------------------------------------------

/// Input to [`SourceAdapter::discover`] for one query string.
#[derive(Debug, Clone)]
pub struct DiscoverySeed {
    pub query: String,
    pub params: QueryParams,
    pub max_results: usize,
}

/// Source-specific candidate produced by discovery. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    /// Identifier of the candidate inside its source; the dedup key.
    pub source_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_hint: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DiscoveryRecord {
    pub fn new(source_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
            title_hint: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// String field from the discovery metadata.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Raw bytes fetched for one discovery record.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub record: DiscoveryRecord,
    pub source: DocumentSource,
    /// Final URL after redirects.
    pub url: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub http_status: u16,
    pub fetched_at: DateTime<Utc>,
}

impl ArtifactBundle {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Provenance record for this fetch.
    pub fn artifact_ref(&self) -> ArtifactRef {
        ArtifactRef {
            sha256: sha256_hex(&self.bytes),
            storage_pointer: self.url.clone(),
            content_type: self.content_type.clone(),
            headers: (!self.headers.is_empty()).then(|| self.headers.clone()),
            fetched_at: self.fetched_at,
            provenance: Provenance {
                source: self.source,
                url: self.url.clone(),
                http_status: Some(self.http_status),
            },
        }
    }
}

/// Read-only lineage shared by every record of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineContext {
    pub query_id: Option<String>,
    pub workflow_run_id: Option<String>,
    pub step_id: Option<String>,
}

impl PipelineContext {
    pub fn enrichment(&self) -> EnrichmentMetadata {
        EnrichmentMetadata {
            query_id: self.query_id.clone(),
            workflow_run_id: self.workflow_run_id.clone(),
            step_id: self.step_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Per-source ingestion contract.
///
/// Stage signatures are uniform across sources: `acquire` produces bytes,
/// `extract` parses them into the adapter's own [`Extracted`](Self::Extracted)
/// type, and `map`/`extensions` are pure projections of that type.
#[async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
    type Extracted: Send + Sync;

    fn source(&self) -> DocumentSource;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str {
        self.source().as_str()
    }

    /// Whether discovery should run once per expanded query variant.
    fn needs_query_expansion(&self) -> bool {
        false
    }

    async fn discover(&self, seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>>;

    /// Fetch the raw artifact. A failure here fails only this record.
    async fn acquire(&self, record: &DiscoveryRecord) -> Result<ArtifactBundle>;

    fn extract(&self, bundle: &ArtifactBundle) -> Result<Self::Extracted>;

    fn map(&self, extracted: &Self::Extracted) -> CanonicalDocumentDraft;

    fn extensions(&self, _extracted: &Self::Extracted) -> Vec<Extension> {
        Vec::new()
    }

    fn validate(&self, draft: &CanonicalDocumentDraft) -> Result<()> {
        validate_draft(draft)
    }

    async fn persist(
        &self,
        draft: &CanonicalDocumentDraft,
        extensions: &[Extension],
        store: &dyn DocumentStore,
    ) -> Result<String> {
        store.upsert(draft, extensions).await
    }
}

/// Apply an externally supplied title. A hint carrying the title/number
/// separator replaces the extracted title; any other hint only fills an
/// empty one.
pub fn apply_title_hint(draft: &mut CanonicalDocumentDraft, hint: Option<&str>) {
    let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) else {
        return;
    };
    if hint.contains(TITLE_NUMBER_SEPARATOR) || draft.title.trim().is_empty() {
        draft.title = hint.to_string();
    }
}

/// Drive one record through every stage, strictly in order. Returns the
/// persisted document id.
#[instrument(skip_all, fields(source = %adapter.source(), record = %record.source_id))]
pub async fn run_pipeline<A>(
    adapter: &A,
    record: &DiscoveryRecord,
    ctx: &PipelineContext,
    store: &dyn DocumentStore,
) -> Result<String>
where
    A: SourceAdapter + ?Sized,
{
    let bundle = adapter.acquire(record).await?;
    let extracted = adapter.extract(&bundle)?;
    let mut draft = adapter.map(&extracted);
    let extensions = adapter.extensions(&extracted);

    draft.artifact_refs.push(bundle.artifact_ref());
    apply_title_hint(&mut draft, record.title_hint.as_deref());
    adapter.validate(&draft)?;

    draft.enrichment_metadata = ctx.enrichment();
    let id = adapter.persist(&draft, &extensions, store).await?;
    debug!(%id, extensions = extensions.len(), "record persisted");
    Ok(id)
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

/// Object-safe view of a [`SourceAdapter`], held by the registry.
#[async_trait]
pub trait IngestPipeline: Send + Sync {
    fn source(&self) -> DocumentSource;
    fn name(&self) -> &str;
    fn needs_query_expansion(&self) -> bool;

    async fn discover(&self, seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>>;

    /// Run the full stage sequence for one record.
    async fn ingest(
        &self,
        record: &DiscoveryRecord,
        ctx: &PipelineContext,
        store: &dyn DocumentStore,
    ) -> Result<String>;
}

/// Wraps a typed adapter as an [`IngestPipeline`].
pub struct AdapterPipeline<A>(pub A);

impl<A: SourceAdapter> AdapterPipeline<A> {
    pub fn shared(adapter: A) -> Arc<dyn IngestPipeline> {
        Arc::new(Self(adapter))
    }
}

#[async_trait]
impl<A: SourceAdapter> IngestPipeline for AdapterPipeline<A> {
    fn source(&self) -> DocumentSource {
        self.0.source()
    }

    fn name(&self) -> &str {
        self.0.name()
    }

    fn needs_query_expansion(&self) -> bool {
        self.0.needs_query_expansion()
    }

    async fn discover(&self, seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>> {
        self.0.discover(seed).await
    }

    async fn ingest(
        &self,
        record: &DiscoveryRecord,
        ctx: &PipelineContext,
        store: &dyn DocumentStore,
    ) -> Result<String> {
        run_pipeline(&self.0, record, ctx, store).await
    }
}

// ---------------------------------------------------------------------------
// Small shared helpers
// ---------------------------------------------------------------------------

/// Lowercase query tokens long enough to be meaningful in URL/anchor matching.
pub(crate) fn keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Parse the date formats seen across sources: ISO dates or timestamps
/// (`2024-01-05`, `2024-01-05T10:00:00Z`), Dutch day-first dates
/// (`05-01-2024`) and 14-digit crawl timestamps.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(head) = raw.get(..10) {
        if let Ok(d) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
            return Some(d);
        }
        if let Ok(d) = NaiveDate::parse_from_str(head, "%d-%m-%Y") {
            return Some(d);
        }
    }
    match raw.get(..8) {
        Some(head) if head.chars().all(|c| c.is_ascii_digit()) => {
            NaiveDate::parse_from_str(head, "%Y%m%d").ok()
        }
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use policyharvest_shared::PolicyHarvestError;

    /// Adapter over an in-memory corpus; records whose id is listed in
    /// `fail_acquire` fail at the acquire stage.
    pub struct StubAdapter {
        pub records: Vec<DiscoveryRecord>,
        pub fail_acquire: Vec<String>,
        pub acquired: AtomicUsize,
    }

    impl StubAdapter {
        pub fn new(ids: &[&str]) -> Self {
            Self {
                records: ids
                    .iter()
                    .map(|id| DiscoveryRecord::new(*id, format!("https://example.org/{id}")))
                    .collect(),
                fail_acquire: Vec::new(),
                acquired: AtomicUsize::new(0),
            }
        }
    }

    pub struct StubExtracted {
        pub id: String,
        pub url: String,
        pub text: String,
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        type Extracted = StubExtracted;

        fn source(&self) -> DocumentSource {
            DocumentSource::Municipal
        }

        async fn discover(&self, _seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>> {
            Ok(self.records.clone())
        }

        async fn acquire(&self, record: &DiscoveryRecord) -> Result<ArtifactBundle> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            if self.fail_acquire.contains(&record.source_id) {
                return Err(PolicyHarvestError::Network(format!("{}: refused", record.url)));
            }
            Ok(ArtifactBundle {
                record: record.clone(),
                source: DocumentSource::Municipal,
                url: record.url.clone(),
                bytes: format!("body of {}", record.source_id).into_bytes(),
                content_type: "text/plain".into(),
                headers: BTreeMap::new(),
                http_status: 200,
                fetched_at: Utc::now(),
            })
        }

        fn extract(&self, bundle: &ArtifactBundle) -> Result<StubExtracted> {
            Ok(StubExtracted {
                id: bundle.record.source_id.clone(),
                url: bundle.url.clone(),
                text: bundle.text(),
            })
        }

        fn map(&self, e: &StubExtracted) -> CanonicalDocumentDraft {
            CanonicalDocumentDraft::new(
                DocumentSource::Municipal,
                e.id.clone(),
                e.url.clone(),
                format!("Page {}", e.id),
                e.text.clone(),
            )
        }
    }
}
