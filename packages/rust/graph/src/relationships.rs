//! Similarity- and metadata-based linking of navigation nodes.

use std::sync::Arc;

use policyharvest_shared::{AppConfig, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::embedding::{EmbeddingProvider, cosine_similarity};
use crate::navigation::{Edge, NavigationGraphStore, NavigationNode};

pub const RELATION_SEMANTIC: &str = "semantic";
pub const RELATION_SAME_AUTHORITY: &str = "same_authority";
pub const RELATION_SAME_JURISDICTION: &str = "same_jurisdiction";

/// Weight of an edge backed only by shared metadata.
const METADATA_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationshipConfig {
    pub max_relationships: usize,
    pub similarity_threshold: f32,
    pub metadata_linking: bool,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            max_relationships: 3,
            similarity_threshold: 0.6,
            metadata_linking: true,
        }
    }
}

impl From<&AppConfig> for RelationshipConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_relationships: config.relationships.max_relationships,
            similarity_threshold: config.relationships.similarity_threshold,
            metadata_linking: config.relationships.metadata_linking,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    pub linked_nodes: usize,
    pub edges_created: usize,
    pub failures: usize,
}

pub struct RelationshipBuilder {
    config: RelationshipConfig,
    provider: Arc<dyn EmbeddingProvider>,
}

fn shared(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x.eq_ignore_ascii_case(y))
}

impl RelationshipBuilder {
    pub fn new(config: RelationshipConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { config, provider }
    }

    pub fn config(&self) -> &RelationshipConfig {
        &self.config
    }

    fn metadata_tags(&self, a: &NavigationNode, b: &NavigationNode) -> Vec<String> {
        if !self.config.metadata_linking {
            return Vec::new();
        }
        let mut tags = Vec::new();
        if shared(&a.authority, &b.authority) {
            tags.push(RELATION_SAME_AUTHORITY.to_string());
        }
        if shared(&a.jurisdiction, &b.jurisdiction) {
            tags.push(RELATION_SAME_JURISDICTION.to_string());
        }
        tags
    }

    /// Choose the edges for `node`: similarity candidates above the threshold
    /// best first, then metadata-only matches for the remaining slots.
    pub fn select_edges(&self, node: &NavigationNode, others: &[NavigationNode]) -> Vec<Edge> {
        let cap = self.config.max_relationships;
        let Some(embedding) = node.embedding.as_deref() else {
            return Vec::new();
        };

        let mut scored: Vec<(f32, &NavigationNode)> = others
            .iter()
            .filter(|o| o.url != node.url)
            .filter_map(|o| {
                let score = cosine_similarity(embedding, o.embedding.as_deref()?);
                (score > self.config.similarity_threshold).then_some((score, o))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.url.cmp(&b.1.url)));

        let mut edges: Vec<Edge> = scored
            .into_iter()
            .take(cap)
            .map(|(score, other)| {
                let mut relations = vec![RELATION_SEMANTIC.to_string()];
                relations.extend(self.metadata_tags(node, other));
                Edge::new(node.url.clone(), other.url.clone(), relations, score)
            })
            .collect();

        if self.config.metadata_linking {
            for other in others.iter().filter(|o| o.url != node.url) {
                if edges.len() >= cap {
                    break;
                }
                if edges.iter().any(|e| e.target == other.url) {
                    continue;
                }
                let tags = self.metadata_tags(node, other);
                if !tags.is_empty() {
                    edges.push(Edge::new(
                        node.url.clone(),
                        other.url.clone(),
                        tags,
                        METADATA_WEIGHT,
                    ));
                }
            }
        }
        edges
    }

    async fn link_one(&self, graph: &dyn NavigationGraphStore, url: &str) -> Result<Option<usize>> {
        let Some(mut node) = graph.node(url).await? else {
            return Ok(None);
        };
        if node.content.trim().is_empty() {
            return Ok(None);
        }

        let embedding = self.provider.embed(&node.content).await?;
        graph.set_embedding(url, embedding.clone()).await?;
        node.embedding = Some(embedding);

        let others = graph.nodes().await?;
        let edges = self.select_edges(&node, &others);
        let created = edges.len();
        // The cap covers all outgoing edges, so a re-linked node starts over.
        let dropped = graph.remove_edges_from(url).await?;
        if dropped > 0 {
            debug!(%url, dropped, "replacing outgoing edges");
        }
        for edge in edges {
            graph.add_edge(edge).await?;
        }
        Ok(Some(created))
    }

    /// Link every node in `urls`. A failing node is logged and skipped.
    #[instrument(skip_all, fields(nodes = urls.len(), model = %self.provider.model_name()))]
    pub async fn link(&self, graph: &dyn NavigationGraphStore, urls: &[String]) -> LinkReport {
        let mut report = LinkReport::default();
        for url in urls {
            match self.link_one(graph, url).await {
                Ok(Some(created)) => {
                    report.linked_nodes += 1;
                    report.edges_created += created;
                }
                Ok(None) => debug!(%url, "node has no text to link"),
                Err(e) => {
                    warn!(%url, error = %e, "relationship linking failed for node");
                    report.failures += 1;
                }
            }
        }
        debug!(
            linked = report.linked_nodes,
            edges = report.edges_created,
            failures = report.failures,
            "relationship linking complete"
        );
        report
    }
}
