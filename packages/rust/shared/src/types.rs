//! Canonical domain types for PolicyHarvest.
//!
//! Every source adapter normalizes into [`CanonicalDocumentDraft`]; the
//! document store turns drafts into [`CanonicalDocument`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PolicyHarvestError, Result};

/// Current schema version for stored canonical documents.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// DocumentSource
// ---------------------------------------------------------------------------

/// The external source a document was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    /// Official-publications registry (gazettes, municipal bulletins).
    OfficialPublications,
    /// Judiciary decision archive.
    Judiciary,
    /// Web-scale crawl index (CDX captures).
    CrawlIndex,
    /// An individual municipal website.
    Municipal,
}

impl DocumentSource {
    /// All known sources, in registry order.
    pub const ALL: [DocumentSource; 4] = [
        Self::OfficialPublications,
        Self::Judiciary,
        Self::CrawlIndex,
        Self::Municipal,
    ];

    /// Stable identifier used in storage and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OfficialPublications => "official_publications",
            Self::Judiciary => "judiciary",
            Self::CrawlIndex => "crawl_index",
            Self::Municipal => "municipal",
        }
    }
}

impl std::fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentSource {
    type Err = PolicyHarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "official_publications" => Ok(Self::OfficialPublications),
            "judiciary" => Ok(Self::Judiciary),
            "crawl_index" => Ok(Self::CrawlIndex),
            "municipal" => Ok(Self::Municipal),
            other => Err(PolicyHarvestError::validation(format!(
                "unknown source '{other}': expected one of official_publications, judiciary, crawl_index, municipal"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Inclusive publication date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    /// Whether `date` falls inside the window. Open ends always match.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// What the caller is looking for. Shared by expansion and discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub date_range: DateRange,
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a raw artifact came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: DocumentSource,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

/// One raw-fetch provenance record backing a canonical document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// SHA-256 of the raw fetched bytes.
    pub sha256: String,
    /// URI the raw artifact can be re-read from.
    pub storage_pointer: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub fetched_at: DateTime<Utc>,
    pub provenance: Provenance,
}

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

/// Typed auxiliary payloads produced by an adapter's `extensions` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extension {
    /// Legal citation set for judiciary decisions and legal texts.
    Legal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ecli: Option<String>,
        #[serde(default)]
        cited_eclis: Vec<String>,
        #[serde(default)]
        article_references: Vec<String>,
        #[serde(default)]
        legal_areas: Vec<String>,
    },
    /// Capture metadata from a crawl index.
    Crawl {
        timestamp: String,
        digest: String,
        mime: String,
        status: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warc_filename: Option<String>,
    },
    /// Site-level metadata for pages fetched from the live web.
    Web {
        domain: String,
        outbound_links: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
    },
    /// Registry metadata for official publications.
    Publication {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        publication_number: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        official_type: Option<String>,
    },
}

impl Extension {
    /// Storage key for the extension kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Legal { .. } => "legal",
            Self::Crawl { .. } => "crawl",
            Self::Web { .. } => "web",
            Self::Publication { .. } => "publication",
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical document
// ---------------------------------------------------------------------------

/// Publication and validity dates of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentDates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<NaiveDate>,
}

/// Lineage stamped onto every document before it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

/// Editorial review state of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// A normalized document that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocumentDraft {
    pub source: DocumentSource,
    /// Identifier of the document inside its source (ECLI, registry id, URL).
    pub source_id: String,
    pub canonical_url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default)]
    pub dates: DocumentDates,
    pub full_text: String,
    pub content_fingerprint: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub artifact_refs: Vec<ArtifactRef>,
    #[serde(default)]
    pub source_metadata: serde_json::Value,
    #[serde(default)]
    pub enrichment_metadata: EnrichmentMetadata,
}

fn default_language() -> String {
    "nl".into()
}

impl CanonicalDocumentDraft {
    /// Start a draft with the fingerprint computed from `full_text`.
    pub fn new(
        source: DocumentSource,
        source_id: impl Into<String>,
        canonical_url: impl Into<String>,
        title: impl Into<String>,
        full_text: impl Into<String>,
    ) -> Self {
        let full_text = full_text.into();
        Self {
            source,
            source_id: source_id.into(),
            canonical_url: canonical_url.into(),
            title: title.into(),
            publisher_authority: None,
            document_family: None,
            document_type: None,
            dates: DocumentDates::default(),
            content_fingerprint: content_fingerprint(&full_text),
            full_text,
            language: default_language(),
            artifact_refs: Vec::new(),
            source_metadata: serde_json::Value::Null,
            enrichment_metadata: EnrichmentMetadata::default(),
        }
    }
}

/// The single normalized representation of a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub id: String,
    pub source: DocumentSource,
    pub source_id: String,
    pub canonical_url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default)]
    pub dates: DocumentDates,
    pub full_text: String,
    pub content_fingerprint: String,
    pub language: String,
    pub artifact_refs: Vec<ArtifactRef>,
    #[serde(default)]
    pub source_metadata: serde_json::Value,
    #[serde(default)]
    pub enrichment_metadata: EnrichmentMetadata,
    #[serde(default)]
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub extensions: Vec<Extension>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl CanonicalDocument {
    /// Materialize a stored document from a draft.
    pub fn from_draft(
        id: impl Into<String>,
        draft: &CanonicalDocumentDraft,
        extensions: &[Extension],
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            source: draft.source,
            source_id: draft.source_id.clone(),
            canonical_url: draft.canonical_url.clone(),
            title: draft.title.clone(),
            publisher_authority: draft.publisher_authority.clone(),
            document_family: draft.document_family.clone(),
            document_type: draft.document_type.clone(),
            dates: draft.dates,
            full_text: draft.full_text.clone(),
            content_fingerprint: draft.content_fingerprint.clone(),
            language: draft.language.clone(),
            artifact_refs: draft.artifact_refs.clone(),
            source_metadata: draft.source_metadata.clone(),
            enrichment_metadata: draft.enrichment_metadata.clone(),
            review_status: ReviewStatus::Pending,
            extensions: extensions.to_vec(),
            created_at,
            updated_at: Utc::now(),
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }

    /// Jurisdiction recorded by the adapter, if any.
    pub fn jurisdiction(&self) -> Option<&str> {
        self.source_metadata
            .get("jurisdiction")
            .and_then(|v| v.as_str())
    }
}

/// SHA-256 content fingerprint, lowercase hex. Stable for identical text.
pub fn content_fingerprint(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// SHA-256 of arbitrary bytes, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Whether `s` looks like a SHA-256 hex digest.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Check the schema rules every draft must satisfy before persistence.
pub fn validate_draft(draft: &CanonicalDocumentDraft) -> Result<()> {
    if draft.source_id.trim().is_empty() {
        return Err(PolicyHarvestError::validation("draft has an empty source_id"));
    }
    if draft.title.trim().is_empty() {
        return Err(PolicyHarvestError::validation(format!(
            "draft {} has an empty title",
            draft.source_id
        )));
    }
    url::Url::parse(&draft.canonical_url).map_err(|e| {
        PolicyHarvestError::validation(format!(
            "draft {} has an invalid canonical_url '{}': {e}",
            draft.source_id, draft.canonical_url
        ))
    })?;
    if !is_sha256_hex(&draft.content_fingerprint)
        || draft.content_fingerprint != content_fingerprint(&draft.full_text)
    {
        return Err(PolicyHarvestError::validation(format!(
            "draft {} has a fingerprint that does not match its text",
            draft.source_id
        )));
    }
    if draft.artifact_refs.is_empty() {
        return Err(PolicyHarvestError::validation(format!(
            "draft {} has no artifact refs",
            draft.source_id
        )));
    }
    if let (Some(from), Some(to)) = (draft.dates.valid_from, draft.dates.valid_to) {
        if from > to {
            return Err(PolicyHarvestError::validation(format!(
                "draft {} is valid from {from} after valid to {to}",
                draft.source_id
            )));
        }
    }
    Ok(())
}
