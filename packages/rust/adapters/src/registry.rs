//! Adapter registry keyed by [`DocumentSource`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use policyharvest_shared::{AppConfig, DocumentSource, Result};
use tracing::debug;

use crate::{
    AdapterPipeline, CrawlIndexAdapter, IngestPipeline, JudiciaryAdapter, MunicipalAdapter,
    OfficialPublicationsAdapter, SourceAdapter,
};

/// Registered adapters. Selection by source is a map lookup.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<DocumentSource, Arc<dyn IngestPipeline>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry for every source enabled in `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.pipeline.fetch_timeout_secs);
        let sources = &config.sources;
        let mut registry = Self::new();

        if sources.official_publications.enabled {
            registry.register(OfficialPublicationsAdapter::new(
                &sources.official_publications,
                timeout,
            )?);
        }
        if sources.judiciary.enabled {
            registry.register(JudiciaryAdapter::new(&sources.judiciary, timeout)?);
        }
        if sources.crawl_index.enabled {
            registry.register(CrawlIndexAdapter::new(&sources.crawl_index, timeout)?);
        }
        if !sources.municipal.sites.is_empty() {
            registry.register(MunicipalAdapter::new(&sources.municipal.sites, timeout)?);
        }

        debug!(sources = ?registry.sources(), "adapter registry built");
        Ok(registry)
    }

    /// Register a typed adapter, replacing any adapter for the same source.
    pub fn register<A: SourceAdapter>(&mut self, adapter: A) {
        self.register_pipeline(AdapterPipeline::shared(adapter));
    }

    pub fn register_pipeline(&mut self, pipeline: Arc<dyn IngestPipeline>) {
        self.adapters.insert(pipeline.source(), pipeline);
    }

    pub fn get(&self, source: DocumentSource) -> Option<Arc<dyn IngestPipeline>> {
        self.adapters.get(&source).cloned()
    }

    pub fn sources(&self) -> Vec<DocumentSource> {
        self.adapters.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
