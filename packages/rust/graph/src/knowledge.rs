//! Knowledge graph: entities and typed relations extracted from documents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use policyharvest_adapters::citations;
use policyharvest_shared::{CanonicalDocument, Extension, PolicyHarvestError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Document,
    Authority,
    Jurisdiction,
    DocumentType,
    Case,
    StatuteArticle,
    Law,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Authority => "authority",
            Self::Jurisdiction => "jurisdiction",
            Self::DocumentType => "document_type",
            Self::Case => "case",
            Self::StatuteArticle => "statute_article",
            Self::Law => "law",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    PublishedBy,
    AppliesIn,
    HasType,
    Cites,
    ReferencesLaw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// `kind:key`, stable across runs.
    pub id: String,
    pub kind: EntityKind,
    pub label: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl Entity {
    pub fn new(kind: EntityKind, key: &str, label: impl Into<String>) -> Self {
        Self {
            id: format!("{}:{}", kind.as_str(), key.trim().to_lowercase()),
            kind,
            label: label.into(),
            properties: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeGraphStats {
    pub entities: usize,
    pub relations: usize,
}

#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    /// Insert or replace by entity id.
    async fn upsert_entity(&self, entity: Entity) -> Result<()>;

    /// Insert a relation; duplicates are ignored.
    async fn upsert_relation(&self, relation: Relation) -> Result<()>;

    async fn stats(&self) -> Result<KnowledgeGraphStats>;
}

#[derive(Default)]
struct KgState {
    entities: BTreeMap<String, Entity>,
    relations: BTreeSet<Relation>,
}

#[derive(Default)]
pub struct MemoryKnowledgeGraph {
    state: RwLock<KgState>,
}

fn poisoned() -> PolicyHarvestError {
    PolicyHarvestError::GraphWrite("knowledge graph lock poisoned".into())
}

impl MemoryKnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.state.read().ok()?.entities.get(id).cloned()
    }

    pub fn relations_from(&self, id: &str) -> Vec<Relation> {
        self.state
            .read()
            .map(|s| s.relations.iter().filter(|r| r.from == id).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KnowledgeGraph for MemoryKnowledgeGraph {
    async fn upsert_entity(&self, entity: Entity) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    async fn upsert_relation(&self, relation: Relation) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.entities.contains_key(&relation.from) || !state.entities.contains_key(&relation.to)
        {
            return Err(PolicyHarvestError::GraphWrite(format!(
                "relation {} -> {} references an unknown entity",
                relation.from, relation.to
            )));
        }
        state.relations.insert(relation);
        Ok(())
    }

    async fn stats(&self) -> Result<KnowledgeGraphStats> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(KnowledgeGraphStats {
            entities: state.entities.len(),
            relations: state.relations.len(),
        })
    }
}

/// Entities and relations extracted from one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl Extraction {
    fn link(&mut self, from: &Entity, to: Entity, kind: RelationKind) {
        self.relations.push(Relation {
            from: from.id.clone(),
            to: to.id.clone(),
            kind,
        });
        if !self.entities.iter().any(|e| e.id == to.id) {
            self.entities.push(to);
        }
    }
}

/// Extract entities and relations from a document. Citations come from the
/// legal extension when present, otherwise from the text.
pub fn extract(doc: &CanonicalDocument) -> Extraction {
    let mut out = Extraction::default();
    let mut document = Entity::new(EntityKind::Document, &doc.id, doc.title.clone());
    document.properties = serde_json::json!({
        "source": doc.source,
        "url": doc.canonical_url,
        "fingerprint": doc.content_fingerprint,
    });
    out.entities.push(document.clone());

    if let Some(authority) = &doc.publisher_authority {
        out.link(
            &document,
            Entity::new(EntityKind::Authority, authority, authority.clone()),
            RelationKind::PublishedBy,
        );
    }
    if let Some(jurisdiction) = doc.jurisdiction() {
        out.link(
            &document,
            Entity::new(EntityKind::Jurisdiction, jurisdiction, jurisdiction),
            RelationKind::AppliesIn,
        );
    }
    if let Some(doc_type) = &doc.document_type {
        out.link(
            &document,
            Entity::new(EntityKind::DocumentType, doc_type, doc_type.clone()),
            RelationKind::HasType,
        );
    }

    let legal = doc.extensions.iter().find_map(|e| match e {
        Extension::Legal {
            ecli,
            cited_eclis,
            article_references,
            ..
        } => Some((ecli, cited_eclis, article_references)),
        _ => None,
    });
    let (cited, articles) = match legal {
        Some((own, cited, articles)) => {
            if let Some(own) = own {
                document.properties["ecli"] = serde_json::Value::String(own.clone());
                out.entities[0] = document.clone();
            }
            (cited.clone(), articles.clone())
        }
        None => (
            citations::extract_eclis(&doc.full_text),
            citations::extract_article_references(&doc.full_text),
        ),
    };

    for ecli in cited.iter().filter(|e| Some(e.as_str()) != doc_ecli(doc)) {
        out.link(&document, Entity::new(EntityKind::Case, ecli, ecli.clone()), RelationKind::Cites);
    }
    for article in &articles {
        out.link(
            &document,
            Entity::new(EntityKind::StatuteArticle, article, article.clone()),
            RelationKind::ReferencesLaw,
        );
    }
    for law in citations::extract_law_names(&doc.full_text) {
        out.link(&document, Entity::new(EntityKind::Law, &law, law.clone()), RelationKind::ReferencesLaw);
    }
    out
}

fn doc_ecli(doc: &CanonicalDocument) -> Option<&str> {
    doc.extensions.iter().find_map(|e| match e {
        Extension::Legal { ecli: Some(ecli), .. } => Some(ecli.as_str()),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationReport {
    pub documents: usize,
    pub entities: usize,
    pub relations: usize,
}

pub struct KnowledgeGraphPopulator {
    graph: Arc<dyn KnowledgeGraph>,
}

impl KnowledgeGraphPopulator {
    pub fn new(graph: Arc<dyn KnowledgeGraph>) -> Self {
        Self { graph }
    }

    /// Write entities and relations for `docs`. The first write failure is
    /// returned; callers treat it as a warning.
    #[instrument(skip_all, fields(documents = docs.len()))]
    pub async fn populate(&self, docs: &[CanonicalDocument]) -> Result<PopulationReport> {
        let mut report = PopulationReport::default();
        for doc in docs {
            let extraction = extract(doc);
            for entity in extraction.entities {
                self.graph.upsert_entity(entity).await?;
                report.entities += 1;
            }
            for relation in extraction.relations {
                self.graph.upsert_relation(relation).await?;
                report.relations += 1;
            }
            report.documents += 1;
        }
        debug!(
            entities = report.entities,
            relations = report.relations,
            "knowledge graph populated"
        );
        Ok(report)
    }
}
