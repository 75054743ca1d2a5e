//! Navigation graph: url-keyed document/page nodes and weighted edges.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use policyharvest_shared::{CanonicalDocument, DocumentSource, PolicyHarvestError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Characters of content kept on a node.
pub const MAX_CONTENT_CHARS: usize = 2000;
/// Characters of content used as the summary.
pub const MAX_SUMMARY_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Document,
    Page,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationNode {
    pub url: String,
    pub kind: NodeKind,
    pub title: String,
    pub content: String,
    pub summary: String,
    /// Fingerprint of the full document text; decides `Unchanged`.
    pub content_hash: String,
    pub domain: Option<String>,
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    pub http_status: Option<u16>,
    pub last_visited: DateTime<Utc>,
    pub last_fetched: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

impl NavigationNode {
    /// Build the node for a persisted document. Web sources become pages,
    /// registry and judiciary documents become document nodes.
    pub fn from_document(doc: &CanonicalDocument) -> Self {
        let kind = match doc.source {
            DocumentSource::CrawlIndex | DocumentSource::Municipal => NodeKind::Page,
            DocumentSource::OfficialPublications | DocumentSource::Judiciary => NodeKind::Document,
        };
        let fetched = doc
            .artifact_refs
            .iter()
            .map(|a| a.fetched_at)
            .max()
            .unwrap_or(doc.updated_at);
        let http_status = doc
            .artifact_refs
            .last()
            .and_then(|a| a.provenance.http_status);
        let domain = url::Url::parse(&doc.canonical_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        Self {
            url: doc.canonical_url.clone(),
            kind,
            title: doc.title.clone(),
            content: truncate_chars(&doc.full_text, MAX_CONTENT_CHARS),
            summary: truncate_chars(&doc.full_text, MAX_SUMMARY_CHARS),
            content_hash: doc.content_fingerprint.clone(),
            domain,
            site_id: doc
                .source_metadata
                .get("site")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| Some(doc.source.as_str().to_string())),
            document_id: Some(doc.id.clone()),
            authority: doc.publisher_authority.clone(),
            jurisdiction: doc.jurisdiction().map(str::to_string),
            http_status,
            last_visited: Utc::now(),
            last_fetched: fetched,
            last_run_id: None,
            embedding: None,
        }
    }
}

/// Weighted, typed edge between two nodes (by url).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub relations: Vec<String>,
    pub weight: f32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relations: Vec<String>,
        weight: f32,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relations,
            weight,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of [`NavigationGraphStore::add_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeUpsert {
    Added,
    Updated,
    Unchanged,
}

impl NodeUpsert {
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCount {
    pub total: usize,
    pub documents: usize,
    pub pages: usize,
    pub edges: usize,
}

/// Who is writing: stamped on added and updated nodes.
#[derive(Debug, Clone, Default)]
pub struct UpsertContext {
    pub run_id: Option<String>,
}

#[async_trait]
pub trait NavigationGraphStore: Send + Sync {
    /// Insert or merge by url. An identical content hash leaves the node
    /// untouched; a different one overwrites content, summary, hash,
    /// fetch time and HTTP status, and clears the stale embedding.
    async fn add_node(&self, node: NavigationNode, ctx: &UpsertContext) -> Result<NodeUpsert>;

    /// Insert an edge, merging relation tags into an existing edge between
    /// the same nodes. The existing edge keeps its `created_at`.
    async fn add_edge(&self, edge: Edge) -> Result<()>;

    /// Drop every outgoing edge of `url`, returning how many were removed.
    async fn remove_edges_from(&self, url: &str) -> Result<usize>;

    async fn node(&self, url: &str) -> Result<Option<NavigationNode>>;

    async fn nodes(&self) -> Result<Vec<NavigationNode>>;

    async fn edges_from(&self, url: &str) -> Result<Vec<Edge>>;

    async fn set_embedding(&self, url: &str, embedding: Vec<f32>) -> Result<()>;

    /// Persist the graph. Called once per batch.
    async fn save(&self) -> Result<()>;

    async fn node_count(&self) -> Result<NodeCount>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphState {
    nodes: BTreeMap<String, NavigationNode>,
    edges: Vec<Edge>,
}

/// In-memory navigation graph with an optional JSON snapshot file.
#[derive(Default)]
pub struct MemoryNavigationGraph {
    state: RwLock<GraphState>,
    path: Option<PathBuf>,
}

fn poisoned() -> PolicyHarvestError {
    PolicyHarvestError::GraphWrite("navigation graph lock poisoned".into())
}

impl MemoryNavigationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a graph backed by `path`, loading the snapshot if it exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                PolicyHarvestError::parse(format!("{}: invalid graph snapshot: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GraphState::default(),
            Err(e) => return Err(PolicyHarvestError::io(path.clone(), e)),
        };
        debug!(path = %path.display(), nodes = state.nodes.len(), "navigation graph opened");
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }
}

#[async_trait]
impl NavigationGraphStore for MemoryNavigationGraph {
    async fn add_node(&self, node: NavigationNode, ctx: &UpsertContext) -> Result<NodeUpsert> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let Some(existing) = state.nodes.get_mut(&node.url) else {
            let mut node = node;
            node.last_run_id = ctx.run_id.clone();
            state.nodes.insert(node.url.clone(), node);
            return Ok(NodeUpsert::Added);
        };

        if existing.content_hash == node.content_hash {
            return Ok(NodeUpsert::Unchanged);
        }

        existing.content = node.content;
        existing.summary = node.summary;
        existing.content_hash = node.content_hash;
        existing.last_fetched = node.last_fetched;
        existing.last_visited = node.last_visited;
        existing.http_status = node.http_status;
        existing.last_run_id = ctx.run_id.clone();
        existing.embedding = None;
        Ok(NodeUpsert::Updated)
    }

    async fn add_edge(&self, edge: Edge) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.nodes.contains_key(&edge.source) || !state.nodes.contains_key(&edge.target) {
            return Err(PolicyHarvestError::GraphWrite(format!(
                "edge {} -> {} references an unknown node",
                edge.source, edge.target
            )));
        }
        match state
            .edges
            .iter_mut()
            .find(|e| e.source == edge.source && e.target == edge.target)
        {
            Some(existing) => {
                for relation in edge.relations {
                    if !existing.relations.contains(&relation) {
                        existing.relations.push(relation);
                    }
                }
                existing.weight = existing.weight.max(edge.weight);
            }
            None => state.edges.push(edge),
        }
        Ok(())
    }

    async fn remove_edges_from(&self, url: &str) -> Result<usize> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let before = state.edges.len();
        state.edges.retain(|e| e.source != url);
        Ok(before - state.edges.len())
    }

    async fn node(&self, url: &str) -> Result<Option<NavigationNode>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.nodes.get(url).cloned())
    }

    async fn nodes(&self) -> Result<Vec<NavigationNode>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.nodes.values().cloned().collect())
    }

    async fn edges_from(&self, url: &str) -> Result<Vec<Edge>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.edges.iter().filter(|e| e.source == url).cloned().collect())
    }

    async fn set_embedding(&self, url: &str, embedding: Vec<f32>) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let node = state
            .nodes
            .get_mut(url)
            .ok_or_else(|| PolicyHarvestError::GraphWrite(format!("no node for {url}")))?;
        node.embedding = Some(embedding);
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let state = self.state.read().map_err(|_| poisoned())?;
            serde_json::to_string(&*state)
                .map_err(|e| PolicyHarvestError::GraphWrite(format!("serialize graph: {e}")))?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PolicyHarvestError::GraphWrite(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| PolicyHarvestError::GraphWrite(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "navigation graph saved");
        Ok(())
    }

    async fn node_count(&self) -> Result<NodeCount> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let documents = state
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Document)
            .count();
        Ok(NodeCount {
            total: state.nodes.len(),
            documents,
            pages: state.nodes.len() - documents,
            edges: state.edges.len(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn node(url: &str, content: &str) -> NavigationNode {
        NavigationNode {
            url: url.into(),
            kind: NodeKind::Page,
            title: format!("Title of {url}"),
            content: content.into(),
            summary: truncate_chars(content, MAX_SUMMARY_CHARS),
            content_hash: policyharvest_shared::content_fingerprint(content),
            domain: Some("voorbeeld.nl".into()),
            site_id: None,
            document_id: None,
            authority: None,
            jurisdiction: None,
            http_status: Some(200),
            last_visited: Utc::now(),
            last_fetched: Utc::now(),
            last_run_id: None,
            embedding: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::node;
    use super::*;
    use policyharvest_shared::{CanonicalDocumentDraft, DocumentSource};
    use uuid::Uuid;

    #[tokio::test]
    async fn identical_node_is_added_then_unchanged() {
        let graph = MemoryNavigationGraph::new();
        let ctx = UpsertContext::default();

        let first = graph.add_node(node("https://a.nl/x", "tekst"), &ctx).await.unwrap();
        let second = graph.add_node(node("https://a.nl/x", "tekst"), &ctx).await.unwrap();

        assert_eq!(first, NodeUpsert::Added);
        assert_eq!(second, NodeUpsert::Unchanged);
        assert_eq!(graph.node_count().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn changed_content_updates_mutable_fields() {
        let graph = MemoryNavigationGraph::new();
        let ctx = UpsertContext {
            run_id: Some("run-2".into()),
        };
        graph.add_node(node("https://a.nl/x", "oud"), &UpsertContext::default()).await.unwrap();
        graph.set_embedding("https://a.nl/x", vec![1.0, 0.0]).await.unwrap();

        let mut changed = node("https://a.nl/x", "nieuw");
        changed.title = "Andere titel".into();
        changed.http_status = Some(203);
        assert_eq!(graph.add_node(changed, &ctx).await.unwrap(), NodeUpsert::Updated);

        let stored = graph.node("https://a.nl/x").await.unwrap().unwrap();
        assert_eq!(stored.content, "nieuw");
        assert_eq!(stored.http_status, Some(203));
        assert_eq!(stored.title, "Title of https://a.nl/x");
        assert_eq!(stored.last_run_id.as_deref(), Some("run-2"));
        assert!(stored.embedding.is_none());
    }

    #[tokio::test]
    async fn edges_merge_relations() {
        let graph = MemoryNavigationGraph::new();
        let ctx = UpsertContext::default();
        graph.add_node(node("https://a.nl/1", "een"), &ctx).await.unwrap();
        graph.add_node(node("https://a.nl/2", "twee"), &ctx).await.unwrap();

        let edge = |relation: &str, weight| {
            Edge::new("https://a.nl/1", "https://a.nl/2", vec![relation.into()], weight)
        };
        let first = edge("semantic", 0.7);
        let created_at = first.created_at;
        graph.add_edge(first).await.unwrap();
        graph.add_edge(edge("same_authority", 0.5)).await.unwrap();

        let edges = graph.edges_from("https://a.nl/1").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relations, vec!["semantic", "same_authority"]);
        assert_eq!(edges[0].weight, 0.7);
        assert_eq!(edges[0].created_at, created_at);

        let dangling = Edge {
            target: "https://a.nl/missing".into(),
            ..edge("semantic", 0.9)
        };
        assert!(matches!(
            graph.add_edge(dangling).await,
            Err(PolicyHarvestError::GraphWrite(_))
        ));
    }

    #[tokio::test]
    async fn outgoing_edges_are_removed_per_source() {
        let graph = MemoryNavigationGraph::new();
        let ctx = UpsertContext::default();
        for i in 1..=3 {
            graph.add_node(node(&format!("https://a.nl/{i}"), "tekst"), &ctx).await.unwrap();
        }
        let link = |from: &str, to: &str| {
            Edge::new(
                format!("https://a.nl/{from}"),
                format!("https://a.nl/{to}"),
                vec!["semantic".into()],
                0.8,
            )
        };
        graph.add_edge(link("1", "2")).await.unwrap();
        graph.add_edge(link("1", "3")).await.unwrap();
        graph.add_edge(link("2", "1")).await.unwrap();

        assert_eq!(graph.remove_edges_from("https://a.nl/1").await.unwrap(), 2);
        assert!(graph.edges_from("https://a.nl/1").await.unwrap().is_empty());
        assert_eq!(graph.edges_from("https://a.nl/2").await.unwrap().len(), 1);
        assert_eq!(graph.remove_edges_from("https://a.nl/1").await.unwrap(), 0);
    }

    #[test]
    fn snapshot_edge_without_timestamp_still_loads() {
        let raw = r#"{"source":"https://a.nl/1","target":"https://a.nl/2","relations":["semantic"],"weight":0.9}"#;
        let edge: Edge = serde_json::from_str(raw).unwrap();
        assert_eq!(edge.relations, vec!["semantic"]);
        assert!(edge.created_at <= Utc::now());
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_file() {
        let path = std::env::temp_dir().join(format!("ph_graph_{}.json", Uuid::now_v7()));
        {
            let graph = MemoryNavigationGraph::open(&path).await.unwrap();
            graph.add_node(node("https://a.nl/x", "tekst"), &UpsertContext::default()).await.unwrap();
            graph.save().await.unwrap();
        }

        let reopened = MemoryNavigationGraph::open(&path).await.unwrap();
        let count = reopened.node_count().await.unwrap();
        assert_eq!(count.total, 1);
        assert_eq!(count.pages, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn document_node_is_truncated() {
        let text = "woord ".repeat(1000);
        let draft = CanonicalDocumentDraft::new(
            DocumentSource::Judiciary,
            "ECLI:NL:HR:2024:1",
            "https://uitspraken.example/ECLI:NL:HR:2024:1",
            "Uitspraak",
            text.clone(),
        );
        let doc = CanonicalDocument::from_draft("doc-1", &draft, &[], Utc::now());
        let node = NavigationNode::from_document(&doc);

        assert_eq!(node.kind, NodeKind::Document);
        assert_eq!(node.content.chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(node.summary.chars().count(), MAX_SUMMARY_CHARS);
        assert_eq!(node.content_hash, doc.content_fingerprint);
        assert_eq!(node.domain.as_deref(), Some("uitspraken.example"));
        assert_eq!(node.document_id.as_deref(), Some("doc-1"));
    }
}
