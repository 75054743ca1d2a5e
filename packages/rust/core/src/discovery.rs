//! Multi-query discovery with cross-query deduplication and early exit.

use std::collections::HashSet;
use std::sync::Arc;

use policyharvest_adapters::{DiscoveryRecord, DiscoverySeed, IngestPipeline};
use policyharvest_shared::{AppConfig, PolicyHarvestError, QueryParams, Result};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveryConfig {
    /// Stop issuing queries once enough unique records are found.
    pub early_exit: bool,
    /// Early exit fires when unique results exceed `max_results × multiplier`.
    pub early_exit_multiplier: f64,
    /// Issue every query concurrently.
    pub parallel_queries: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            early_exit: true,
            early_exit_multiplier: 1.2,
            parallel_queries: false,
        }
    }
}

impl From<&AppConfig> for DiscoveryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            early_exit: config.pipeline.early_exit,
            early_exit_multiplier: config.pipeline.early_exit_multiplier,
            parallel_queries: config.pipeline.parallel_queries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryOutcome {
    /// Unique records, first occurrence wins.
    pub records: Vec<DiscoveryRecord>,
    pub queries_run: usize,
    pub queries_failed: usize,
    pub duplicates: usize,
    pub exited_early: bool,
}

struct Merger {
    seen: HashSet<String>,
    threshold: Option<usize>,
    outcome: DiscoveryOutcome,
}

impl Merger {
    fn new(config: &DiscoveryConfig, max_results: usize) -> Self {
        let threshold = config
            .early_exit
            .then(|| (max_results as f64 * config.early_exit_multiplier).floor() as usize);
        Self {
            seen: HashSet::new(),
            threshold,
            outcome: DiscoveryOutcome::default(),
        }
    }

    fn push(&mut self, records: Vec<DiscoveryRecord>) {
        self.outcome.queries_run += 1;
        for record in records {
            if self.seen.insert(record.source_id.clone()) {
                self.outcome.records.push(record);
            } else {
                self.outcome.duplicates += 1;
            }
        }
    }

    fn satisfied(&self) -> bool {
        self.threshold
            .is_some_and(|t| self.outcome.records.len() > t)
    }
}

/// Discover with every query in `queries`, deduplicating by `source_id`.
///
/// A failing query is logged and skipped. When every query fails, the first
/// failure is returned.
#[instrument(skip_all, fields(source = %pipeline.source(), queries = queries.len()))]
pub async fn discover_all(
    pipeline: &Arc<dyn IngestPipeline>,
    queries: &[String],
    params: &QueryParams,
    max_results: usize,
    config: &DiscoveryConfig,
) -> Result<DiscoveryOutcome> {
    let seed = |query: &str| DiscoverySeed {
        query: query.to_string(),
        params: params.clone(),
        max_results,
    };
    let mut merger = Merger::new(config, max_results);
    let mut first_error: Option<PolicyHarvestError> = None;

    let mut record_failure = |query: &str, e: PolicyHarvestError, merger: &mut Merger| {
        warn!(%query, error = %e, "discovery query failed; skipping");
        merger.outcome.queries_failed += 1;
        first_error.get_or_insert(e);
    };

    if config.parallel_queries {
        let mut set = JoinSet::new();
        for (index, query) in queries.iter().enumerate() {
            let pipeline = pipeline.clone();
            let seed = seed(query.as_str());
            set.spawn(async move { (index, pipeline.discover(&seed).await) });
        }

        let mut results: Vec<Option<Result<Vec<DiscoveryRecord>>>> =
            (0..queries.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "discovery task failed"),
            }
        }

        for (query, result) in queries.iter().zip(results) {
            if merger.satisfied() {
                merger.outcome.exited_early = true;
                break;
            }
            match result {
                Some(Ok(records)) => merger.push(records),
                Some(Err(e)) => record_failure(query.as_str(), e, &mut merger),
                None => record_failure(
                    query.as_str(),
                    PolicyHarvestError::record(query.as_str(), "discovery task aborted"),
                    &mut merger,
                ),
            }
        }
    } else {
        for query in queries {
            if merger.satisfied() {
                merger.outcome.exited_early = true;
                break;
            }
            match pipeline.discover(&seed(query.as_str())).await {
                Ok(records) => merger.push(records),
                Err(e) => record_failure(query.as_str(), e, &mut merger),
            }
        }
    }

    let outcome = merger.outcome;
    if outcome.queries_run == 0 {
        if let Some(e) = first_error {
            return Err(e);
        }
    }

    debug!(
        records = outcome.records.len(),
        duplicates = outcome.duplicates,
        failed = outcome.queries_failed,
        exited_early = outcome.exited_early,
        "discovery complete"
    );
    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use policyharvest_adapters::PipelineContext;
    use policyharvest_shared::{CanonicalDocumentDraft, DocumentSource, Extension};
    use policyharvest_storage::DocumentStore;

    use super::*;

    /// Pipeline over canned per-query results. Records listed in `failing`
    /// fail during ingest; queries listed in `broken_queries` fail discovery.
    pub struct ScriptedPipeline {
        pub source: DocumentSource,
        pub expands: bool,
        pub results: HashMap<String, Vec<String>>,
        pub broken_queries: Vec<String>,
        pub failing: Vec<String>,
        pub discover_calls: Mutex<Vec<String>>,
    }

    impl ScriptedPipeline {
        pub fn new(source: DocumentSource, results: &[(&str, &[&str])]) -> Self {
            Self {
                source,
                expands: true,
                results: results
                    .iter()
                    .map(|(q, ids)| (q.to_string(), ids.iter().map(|s| s.to_string()).collect()))
                    .collect(),
                broken_queries: Vec::new(),
                failing: Vec::new(),
                discover_calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.discover_calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl IngestPipeline for ScriptedPipeline {
        fn source(&self) -> DocumentSource {
            self.source
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn needs_query_expansion(&self) -> bool {
            self.expands
        }

        async fn discover(&self, seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>> {
            if let Ok(mut calls) = self.discover_calls.lock() {
                calls.push(seed.query.clone());
            }
            if self.broken_queries.contains(&seed.query) {
                return Err(PolicyHarvestError::Network(format!("{}: connection refused", seed.query)));
            }
            Ok(self
                .results
                .get(&seed.query)
                .into_iter()
                .flatten()
                .map(|id| DiscoveryRecord::new(id.as_str(), format!("https://bron.example/{id}")))
                .collect())
        }

        async fn ingest(
            &self,
            record: &DiscoveryRecord,
            ctx: &PipelineContext,
            store: &dyn DocumentStore,
        ) -> Result<String> {
            if self.failing.contains(&record.source_id) {
                return Err(PolicyHarvestError::parse(format!("{}: unreadable", record.source_id)));
            }
            let mut draft = CanonicalDocumentDraft::new(
                self.source,
                record.source_id.clone(),
                record.url.clone(),
                format!("Document {}", record.source_id),
                format!("Inhoud van document {}", record.source_id),
            );
            draft.publisher_authority = Some("Gemeente Voorbeeld".into());
            draft.artifact_refs.push(policyharvest_shared::ArtifactRef {
                sha256: policyharvest_shared::sha256_hex(record.source_id.as_bytes()),
                storage_pointer: record.url.clone(),
                content_type: "text/plain".into(),
                headers: None,
                fetched_at: chrono::Utc::now(),
                provenance: policyharvest_shared::Provenance {
                    source: self.source,
                    url: record.url.clone(),
                    http_status: Some(200),
                },
            });
            draft.enrichment_metadata = ctx.enrichment();
            let extensions: Vec<Extension> = Vec::new();
            store.upsert(&draft, &extensions).await
        }
    }
}
