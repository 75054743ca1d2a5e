//! Shared types, error model, and configuration for PolicyHarvest.
//!
//! This crate is the foundation depended on by all other PolicyHarvest crates.
//! It provides:
//! - [`PolicyHarvestError`] and the [`FailureKind`] taxonomy
//! - The canonical document model ([`CanonicalDocumentDraft`], [`CanonicalDocument`])
//! - Configuration ([`AppConfig`], config loading)
//! - ETL hand-off contracts ([`etl`])

pub mod config;
pub mod error;
pub mod etl;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, EmbeddingSettings, ExpansionSettings, ExpansionStrategy,
    KnowledgeGraphSettings, MunicipalSite, PipelineConfig, RelationshipSettings, SourcesConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    validate_config,
};
pub use error::{FailureKind, PolicyHarvestError, Result};
pub use types::{
    ArtifactRef, CURRENT_SCHEMA_VERSION, CanonicalDocument, CanonicalDocumentDraft, DateRange,
    DocumentDates, DocumentSource, EnrichmentMetadata, Extension, Provenance, QueryParams,
    ReviewStatus, content_fingerprint, is_sha256_hex, sha256_hex, validate_draft,
};
