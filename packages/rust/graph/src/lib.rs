//! Derived graphs built from ingested documents.
//!
//! - [`navigation`]: url-keyed node/edge store with upsert semantics
//! - [`embedding`]: embedding providers and cosine similarity
//! - [`relationships`]: similarity and metadata linking between nodes
//! - [`knowledge`]: entity/relation extraction into a knowledge graph

pub mod embedding;
pub mod knowledge;
pub mod navigation;
pub mod relationships;

pub use embedding::{
    EmbeddingProvider, HashingEmbedder, RemoteEmbedder, cosine_similarity, provider_from_config,
};
pub use knowledge::{
    Entity, EntityKind, KnowledgeGraph, KnowledgeGraphPopulator, KnowledgeGraphStats,
    MemoryKnowledgeGraph, PopulationReport, Relation, RelationKind,
};
pub use navigation::{
    Edge, MemoryNavigationGraph, NavigationGraphStore, NavigationNode, NodeCount, NodeKind,
    NodeUpsert, UpsertContext,
};
pub use relationships::{LinkReport, RelationshipBuilder, RelationshipConfig};
