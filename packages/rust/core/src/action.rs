//! The per-source ingestion action.
//!
//! [`IngestSourceAction`] drives one source end to end: query tracking,
//! optional query expansion, multi-query discovery, the bounded batch
//! executor, read-after-write collection, navigation-graph upserts and the
//! optional enrichment side effects. Only validation failures escape; every
//! other failure degrades the source to an empty result with diagnostics.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use policyharvest_adapters::{IngestPipeline, PipelineContext};
use policyharvest_expansion::{ExpansionRequest, QueryExpansionService};
use policyharvest_graph::{
    KnowledgeGraphPopulator, NavigationGraphStore, NavigationNode, RelationshipBuilder,
    UpsertContext,
};
use policyharvest_shared::etl::{
    ETL_JOB_SCHEMA_VERSION, EtlJobArtifacts, EtlJobInput, EtlJobModels, EtlJobOutput,
    EtlJobRequest, ExtensionFlags, GeoSource, OutputFormat, validate_etl_job_request,
};
use policyharvest_shared::{
    AppConfig, CanonicalDocument, DocumentSource, PolicyHarvestError, QueryParams, Result,
    expand_home,
};
use policyharvest_storage::{DocumentStore, QueryTracker};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::diagnostics::FailureDiagnostics;
use crate::discovery::{DiscoveryConfig, discover_all};
use crate::executor::{BatchCounters, BatchExecutor, BatchProgress, ExecutorConfig};
use crate::run_log::{LogLevel, RunLogger, log_quietly};
use crate::workflow::{Action, StepContext, StepOutput};

/// Step output carrying the tracked query id.
pub const OUTPUT_QUERY_ID: &str = "query_id";
pub const OUTPUT_DOCUMENT_IDS: &str = "document_ids";
pub const OUTPUT_DIAGNOSTICS: &str = "diagnostics";
pub const OUTPUT_BATCH: &str = "batch";
pub const OUTPUT_WARNINGS: &str = "side_effect_warnings";

/// Parameters of one ingestion step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestParams {
    #[serde(flatten)]
    pub query: QueryParams,
    /// Reuse an existing tracked query instead of creating one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl IngestParams {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            query: QueryParams {
                subject: subject.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.subject.trim().is_empty() {
            return Err(PolicyHarvestError::validation("subject must not be empty"));
        }
        if self.max_results == Some(0) {
            return Err(PolicyHarvestError::validation("max_results must be at least 1"));
        }
        if let (Some(from), Some(to)) = (self.query.date_range.from, self.query.date_range.to) {
            if from > to {
                return Err(PolicyHarvestError::validation(format!(
                    "date range starts {from} after it ends {to}"
                )));
            }
        }
        if self.query_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(PolicyHarvestError::validation("query_id must not be blank"));
        }
        Ok(())
    }
}

/// Where and how to emit `etl-job@v1` requests.
#[derive(Debug, Clone, PartialEq)]
pub struct EtlEmission {
    pub dir: PathBuf,
    pub nlp_model_id: String,
    pub rdf_mapping_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub executor: ExecutorConfig,
    pub discovery: DiscoveryConfig,
    pub default_max_results: usize,
    pub etl: Option<EtlEmission>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            discovery: DiscoveryConfig::default(),
            default_max_results: 50,
            etl: None,
        }
    }
}

impl From<&AppConfig> for IngestOptions {
    fn from(config: &AppConfig) -> Self {
        let kg = &config.knowledge_graph;
        Self {
            executor: ExecutorConfig::from(config),
            discovery: DiscoveryConfig::from(config),
            default_max_results: config.defaults.max_results,
            etl: kg.etl_job_dir.as_deref().map(|dir| EtlEmission {
                dir: expand_home(dir),
                nlp_model_id: kg.nlp_model_id.clone(),
                rdf_mapping_version: kg.rdf_mapping_version.clone(),
            }),
        }
    }
}

/// Collaborators shared by every source's action.
#[derive(Clone)]
pub struct IngestServices {
    pub store: Arc<dyn DocumentStore>,
    pub tracker: Arc<dyn QueryTracker>,
    pub expansion: Arc<QueryExpansionService>,
    pub navigation: Arc<dyn NavigationGraphStore>,
    pub relationships: Option<Arc<RelationshipBuilder>>,
    pub knowledge: Option<Arc<KnowledgeGraphPopulator>>,
    pub run_logger: Arc<dyn RunLogger>,
}

impl IngestServices {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        tracker: Arc<dyn QueryTracker>,
        expansion: Arc<QueryExpansionService>,
        navigation: Arc<dyn NavigationGraphStore>,
        run_logger: Arc<dyn RunLogger>,
    ) -> Self {
        Self {
            store,
            tracker,
            expansion,
            navigation,
            relationships: None,
            knowledge: None,
            run_logger,
        }
    }

    pub fn with_relationships(mut self, builder: Arc<RelationshipBuilder>) -> Self {
        self.relationships = Some(builder);
        self
    }

    pub fn with_knowledge(mut self, populator: Arc<KnowledgeGraphPopulator>) -> Self {
        self.knowledge = Some(populator);
        self
    }
}

/// Result of ingesting one source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionOutcome {
    pub source: Option<DocumentSource>,
    pub query_id: Option<String>,
    pub queries: Vec<String>,
    pub documents: Vec<CanonicalDocument>,
    pub diagnostics: Option<FailureDiagnostics>,
    /// Enrichment steps that failed after documents were persisted.
    pub side_effect_warnings: Vec<String>,
    pub batch: BatchCounters,
    pub exited_early: bool,
    pub etl_job_path: Option<PathBuf>,
}

impl ActionOutcome {
    pub fn is_degraded(&self) -> bool {
        self.diagnostics.is_some()
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.id.clone()).collect()
    }
}

pub struct IngestSourceAction {
    name: String,
    pipeline: Arc<dyn IngestPipeline>,
    services: IngestServices,
    options: IngestOptions,
    progress: Option<Arc<dyn BatchProgress>>,
}

impl IngestSourceAction {
    pub fn new(pipeline: Arc<dyn IngestPipeline>, services: IngestServices, options: IngestOptions) -> Self {
        Self {
            name: format!("ingest:{}", pipeline.source()),
            pipeline,
            services,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn BatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn source(&self) -> DocumentSource {
        self.pipeline.source()
    }

    /// Ingest one source. Errors only for invalid parameters.
    #[instrument(skip_all, fields(source = %self.pipeline.source(), subject = %params.query.subject))]
    pub async fn run(
        &self,
        params: &IngestParams,
        ctx: &PipelineContext,
        run_id: &str,
    ) -> Result<ActionOutcome> {
        params.validate()?;

        let mut outcome = ActionOutcome {
            source: Some(self.pipeline.source()),
            ..Default::default()
        };

        match self.ingest(params, ctx, run_id, &mut outcome).await {
            Ok(()) => {
                info!(
                    documents = outcome.documents.len(),
                    failed = outcome.batch.failed,
                    warnings = outcome.side_effect_warnings.len(),
                    "source ingested"
                );
                log_quietly(
                    self.services.run_logger.as_ref(),
                    run_id,
                    &format!(
                        "{} ingested {} document(s)",
                        self.pipeline.source(),
                        outcome.documents.len()
                    ),
                    LogLevel::Info,
                    Some(&json!({
                        "query_id": outcome.query_id,
                        "queries": outcome.queries,
                        "batch": outcome.batch,
                        "exited_early": outcome.exited_early,
                    })),
                )
                .await;
                Ok(outcome)
            }
            Err(e) if e.is_validation() => Err(e),
            Err(e) => {
                let diagnostics = FailureDiagnostics::from_error(self.pipeline.source(), &e, &params.query);
                warn!(kind = diagnostics.kind.as_str(), error = %e, "source degraded to an empty result");
                log_quietly(
                    self.services.run_logger.as_ref(),
                    run_id,
                    &format!("{} ingestion failed: {}", self.pipeline.source(), diagnostics.guidance),
                    LogLevel::Warn,
                    Some(&diagnostics.to_json()),
                )
                .await;
                outcome.documents.clear();
                outcome.diagnostics = Some(diagnostics);
                Ok(outcome)
            }
        }
    }

    async fn ingest(
        &self,
        params: &IngestParams,
        ctx: &PipelineContext,
        run_id: &str,
        outcome: &mut ActionOutcome,
    ) -> Result<()> {
        let query_id = self.resolve_query(params).await?;
        outcome.query_id = Some(query_id.clone());

        let queries = if self.pipeline.needs_query_expansion() {
            let request = ExpansionRequest::from(params.query.clone());
            self.services.expansion.expand(&request).await.queries
        } else {
            vec![params.query.subject.trim().to_string()]
        };
        outcome.queries = queries.clone();

        let max_results = params.max_results.unwrap_or(self.options.default_max_results);
        let discovered = discover_all(
            &self.pipeline,
            &queries,
            &params.query,
            max_results,
            &self.options.discovery,
        )
        .await?;
        outcome.exited_early = discovered.exited_early;

        let record_ctx = PipelineContext {
            query_id: Some(query_id),
            ..ctx.clone()
        };
        let mut executor = BatchExecutor::new(self.options.executor);
        if let Some(progress) = &self.progress {
            executor = executor.with_progress(progress.clone());
        }
        let batch = executor
            .run(discovered.records, |record| {
                let pipeline = self.pipeline.clone();
                let store = self.services.store.clone();
                let ctx = record_ctx.clone();
                async move { pipeline.ingest(&record, &ctx, store.as_ref()).await }
            })
            .await;
        outcome.batch = batch.counters;

        for (key, e) in batch.failures() {
            warn!(record = %key, error = %e, "record skipped");
        }

        let mut seen = HashSet::new();
        for (_, id) in batch.successes() {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.services.store.find_by_id(id).await? {
                Some(doc) => outcome.documents.push(doc),
                None => warn!(document = %id, "persisted document not found on read-back"),
            }
        }

        self.enrich(run_id, outcome).await;
        Ok(())
    }

    async fn resolve_query(&self, params: &IngestParams) -> Result<String> {
        match &params.query_id {
            Some(id) => {
                if self.services.tracker.query_exists(id).await? {
                    Ok(id.clone())
                } else {
                    Err(PolicyHarvestError::validation(format!("unknown query_id '{id}'")))
                }
            }
            None => self.services.tracker.create_query(&params.query).await,
        }
    }

    /// Graph upserts and downstream hand-off. Failures become warnings.
    async fn enrich(&self, run_id: &str, outcome: &mut ActionOutcome) {
        if outcome.documents.is_empty() {
            return;
        }
        let navigation = self.services.navigation.as_ref();
        let upsert_ctx = UpsertContext {
            run_id: Some(run_id.to_string()),
        };

        let mut changed = Vec::new();
        for doc in &outcome.documents {
            let node = NavigationNode::from_document(doc);
            let url = node.url.clone();
            match navigation.add_node(node, &upsert_ctx).await {
                Ok(result) if result.is_changed() => changed.push(url),
                Ok(_) => {}
                Err(e) => outcome
                    .side_effect_warnings
                    .push(format!("navigation node {url}: {e}")),
            }
        }
        if let Err(e) = navigation.save().await {
            outcome
                .side_effect_warnings
                .push(format!("navigation graph save: {e}"));
        }

        if let Some(builder) = &self.services.relationships {
            if !changed.is_empty() {
                let report = builder.link(navigation, &changed).await;
                if report.failures > 0 {
                    outcome.side_effect_warnings.push(format!(
                        "relationship linking failed for {} node(s)",
                        report.failures
                    ));
                }
            }
        }

        if let Some(populator) = &self.services.knowledge {
            if let Err(e) = populator.populate(&outcome.documents).await {
                outcome
                    .side_effect_warnings
                    .push(format!("knowledge graph population: {e}"));
            }
        }

        if let Some(etl) = &self.options.etl {
            match emit_etl_job(etl, run_id, self.pipeline.source(), &outcome.documents).await {
                Ok(path) => outcome.etl_job_path = Some(path),
                Err(e) => outcome.side_effect_warnings.push(format!("etl job request: {e}")),
            }
        }

        for warning in &outcome.side_effect_warnings {
            warn!(%warning, "enrichment step failed");
        }
        if !outcome.side_effect_warnings.is_empty() {
            log_quietly(
                self.services.run_logger.as_ref(),
                run_id,
                "enrichment completed with warnings",
                LogLevel::Warn,
                Some(&json!({ "warnings": outcome.side_effect_warnings })),
            )
            .await;
        }
    }
}

/// Write an `etl-job@v1` request for `documents` into `etl.dir`.
async fn emit_etl_job(
    etl: &EtlEmission,
    run_id: &str,
    source: DocumentSource,
    documents: &[CanonicalDocument],
) -> Result<PathBuf> {
    let artifact_refs: Vec<String> = documents
        .iter()
        .flat_map(|d| d.artifact_refs.iter().map(|a| a.sha256.clone()))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let request = EtlJobRequest {
        schema_version: ETL_JOB_SCHEMA_VERSION.to_string(),
        run_id: run_id.to_string(),
        created_at: Utc::now().to_rfc3339(),
        input: EtlJobInput {
            document_ids: Some(documents.iter().map(|d| d.id.clone()).collect()),
            query: None,
            include_chunks: false,
            include_extensions: ExtensionFlags {
                geo: false,
                legal: source == DocumentSource::Judiciary,
                web: matches!(source, DocumentSource::CrawlIndex | DocumentSource::Municipal),
            },
            geo_source: GeoSource::Mongo,
        },
        artifacts: Some(EtlJobArtifacts {
            artifact_refs: Some(artifact_refs),
        }),
        models: EtlJobModels {
            nlp_model_id: etl.nlp_model_id.clone(),
            rdf_mapping_version: etl.rdf_mapping_version.clone(),
        },
        output: EtlJobOutput {
            format: OutputFormat::Turtle,
            output_dir: Some(etl.dir.join("output").to_string_lossy().into_owned()),
            artifact_store_prefix: None,
            manifest_name: format!("{run_id}-{source}-manifest.json"),
        },
    };

    let value = serde_json::to_value(&request)
        .map_err(|e| PolicyHarvestError::parse(format!("etl job request: {e}")))?;
    validate_etl_job_request(value.clone())
        .map_err(|e| PolicyHarvestError::validation(format!("etl job request rejected: {e}")))?;

    tokio::fs::create_dir_all(&etl.dir)
        .await
        .map_err(|e| PolicyHarvestError::io(etl.dir.clone(), e))?;
    let path = etl.dir.join(format!("etl-job-{run_id}-{source}.json"));
    let body = serde_json::to_string_pretty(&value)
        .map_err(|e| PolicyHarvestError::parse(format!("etl job request: {e}")))?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| PolicyHarvestError::io(path.clone(), e))?;
    Ok(path)
}

#[async_trait]
impl Action for IngestSourceAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn produces(&self) -> &[&'static str] {
        &[
            OUTPUT_QUERY_ID,
            OUTPUT_DOCUMENT_IDS,
            OUTPUT_DIAGNOSTICS,
            OUTPUT_BATCH,
            OUTPUT_WARNINGS,
        ]
    }

    fn consumes(&self) -> &[&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &StepContext, run_id: &str) -> Result<StepOutput> {
        let mut params: IngestParams = serde_json::from_value(ctx.params.clone())
            .map_err(|e| PolicyHarvestError::validation(format!("invalid ingest parameters: {e}")))?;
        if params.query_id.is_none() {
            params.query_id = ctx.get_str(OUTPUT_QUERY_ID).map(str::to_string);
        }

        let pipeline_ctx = PipelineContext {
            query_id: None,
            workflow_run_id: Some(ctx.workflow_run_id.clone().unwrap_or_else(|| run_id.to_string())),
            step_id: ctx.step_id.clone(),
        };
        let outcome = self.run(&params, &pipeline_ctx, run_id).await?;

        let mut output = StepOutput::default().with(OUTPUT_DOCUMENT_IDS, outcome.document_ids());
        if let Some(query_id) = &outcome.query_id {
            output.insert(OUTPUT_QUERY_ID, query_id.as_str());
        }
        output.insert(
            OUTPUT_DIAGNOSTICS,
            outcome
                .diagnostics
                .as_ref()
                .map(FailureDiagnostics::to_json)
                .unwrap_or(serde_json::Value::Null),
        );
        output.insert(OUTPUT_BATCH, serde_json::to_value(outcome.batch).unwrap_or_default());
        output.insert(OUTPUT_WARNINGS, outcome.side_effect_warnings);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use policyharvest_adapters::{AdapterPipeline, JudiciaryAdapter};
    use std::collections::BTreeMap;

    use policyharvest_expansion::{
        ExpansionConfig, TermSource, ThesaurusTermSource, UnavailableTermSource,
    };
    use policyharvest_graph::{KnowledgeGraph, MemoryKnowledgeGraph, MemoryNavigationGraph};
    use policyharvest_shared::config::JudiciaryConfig;
    use policyharvest_shared::{ExpansionStrategy, FailureKind};
    use policyharvest_storage::MemoryStore;
    use uuid::Uuid;

    use super::*;
    use crate::discovery::test_support::ScriptedPipeline;
    use crate::run_log::TracingRunLogger;
    use crate::workflow::ActionRegistry;

    struct Fixture {
        store: Arc<MemoryStore>,
        navigation: Arc<MemoryNavigationGraph>,
        services: IngestServices,
    }

    fn fixture() -> Fixture {
        fixture_with(ExpansionStrategy::Single, Arc::new(UnavailableTermSource))
    }

    fn fixture_with(strategy: ExpansionStrategy, terms: Arc<dyn TermSource>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let navigation = Arc::new(MemoryNavigationGraph::new());
        let expansion = Arc::new(QueryExpansionService::new(
            ExpansionConfig {
                default_strategy: strategy,
                max_queries: 5,
                timeout: Duration::from_secs(1),
            },
            terms,
        ));
        let services = IngestServices::new(
            store.clone(),
            store.clone(),
            expansion,
            navigation.clone(),
            Arc::new(TracingRunLogger),
        );
        Fixture {
            store,
            navigation,
            services,
        }
    }

    fn ten_records(failing: &[&str]) -> Arc<dyn IngestPipeline> {
        let ids: Vec<String> = (0..10).map(|i| format!("rec-{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut pipeline = ScriptedPipeline::new(DocumentSource::Municipal, &[("parkeren", &refs)]);
        pipeline.failing = failing.iter().map(|s| s.to_string()).collect();
        Arc::new(pipeline)
    }

    #[tokio::test]
    async fn failing_records_are_isolated() {
        let fx = fixture();
        let action = IngestSourceAction::new(
            ten_records(&["rec-3", "rec-7"]),
            fx.services.clone(),
            IngestOptions::default(),
        );

        let outcome = action
            .run(&IngestParams::new("parkeren"), &PipelineContext::default(), "run-1")
            .await
            .unwrap();

        assert_eq!(outcome.batch.succeeded, 8);
        assert_eq!(outcome.batch.failed, 2);
        assert_eq!(outcome.batch.total, 10);
        assert_eq!(outcome.documents.len(), 8);
        assert!(outcome.diagnostics.is_none());
        assert_eq!(fx.store.count().await.unwrap(), 8);
        assert_eq!(fx.navigation.node_count().await.unwrap().documents, 8);
    }

    #[tokio::test]
    async fn unreachable_source_degrades_while_sibling_runs() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fx = fixture();
        let judiciary = JudiciaryAdapter::new(
            &JudiciaryConfig {
                enabled: true,
                search_url: format!("{}/uitspraken/zoeken", server.uri()),
                content_url: format!("{}/uitspraken/content", server.uri()),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let failing = IngestSourceAction::new(
            AdapterPipeline::shared(judiciary),
            fx.services.clone(),
            IngestOptions::default(),
        );
        let sibling = IngestSourceAction::new(ten_records(&[]), fx.services.clone(), IngestOptions::default());

        let params = IngestParams::new("parkeren");
        let degraded = failing
            .run(&params, &PipelineContext::default(), "run-2")
            .await
            .unwrap();
        assert!(degraded.documents.is_empty());
        let diagnostics = degraded.diagnostics.as_ref().unwrap();
        assert_eq!(diagnostics.kind, FailureKind::Network);
        assert!(diagnostics.is_network);
        assert_eq!(diagnostics.query.subject, "parkeren");
        assert!(degraded.query_id.is_some());

        let healthy = sibling
            .run(&params, &PipelineContext::default(), "run-2")
            .await
            .unwrap();
        assert_eq!(healthy.documents.len(), 10);
        assert!(!healthy.is_degraded());
    }

    #[tokio::test]
    async fn oversized_feed_degrades_instead_of_failing_the_step() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("content-type", "application/xml")
                    .set_body_string("x".repeat(26 * 1024 * 1024)),
            )
            .mount(&server)
            .await;

        let fx = fixture();
        let judiciary = JudiciaryAdapter::new(
            &JudiciaryConfig {
                enabled: true,
                search_url: format!("{}/uitspraken/zoeken", server.uri()),
                content_url: format!("{}/uitspraken/content", server.uri()),
            },
            Duration::from_secs(30),
        )
        .unwrap();
        let action = IngestSourceAction::new(
            AdapterPipeline::shared(judiciary),
            fx.services.clone(),
            IngestOptions::default(),
        );

        let outcome = action
            .run(&IngestParams::new("parkeren"), &PipelineContext::default(), "run-6")
            .await
            .unwrap();
        assert!(outcome.documents.is_empty());
        let diagnostics = outcome.diagnostics.as_ref().unwrap();
        assert!(diagnostics.message.contains("too large"));
        assert_eq!(fx.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn records_found_by_several_expanded_queries_are_processed_once() {
        let mut table = BTreeMap::new();
        table.insert("parkeren".to_string(), vec!["parkeerbeleid".to_string()]);
        let fx = fixture_with(ExpansionStrategy::Auto, Arc::new(ThesaurusTermSource::new(table)));
        let pipeline = ScriptedPipeline::new(
            DocumentSource::Municipal,
            &[("parkeren", &["X", "Y"]), ("parkeerbeleid", &["X"])],
        );
        let options = IngestOptions {
            discovery: DiscoveryConfig {
                early_exit: false,
                ..DiscoveryConfig::default()
            },
            ..IngestOptions::default()
        };
        let action = IngestSourceAction::new(Arc::new(pipeline), fx.services.clone(), options);

        let outcome = action
            .run(&IngestParams::new("parkeren"), &PipelineContext::default(), "run-7")
            .await
            .unwrap();

        assert_eq!(outcome.queries, vec!["parkeren", "parkeerbeleid"]);
        assert_eq!(outcome.batch.total, 2);
        assert_eq!(outcome.batch.succeeded, 2);
        assert_eq!(outcome.documents.len(), 2);
        assert_eq!(fx.store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn invalid_params_propagate() {
        let fx = fixture();
        let action = IngestSourceAction::new(ten_records(&[]), fx.services, IngestOptions::default());

        let err = action
            .run(&IngestParams::new("  "), &PipelineContext::default(), "run-3")
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let mut unknown = IngestParams::new("parkeren");
        unknown.query_id = Some("no-such-query".into());
        let err = action
            .run(&unknown, &PipelineContext::default(), "run-3")
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(fx.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn step_output_carries_query_id_into_documents() {
        let fx = fixture();
        let mut registry = ActionRegistry::new();
        registry.register_action(
            "ingest",
            Arc::new(IngestSourceAction::new(ten_records(&[]), fx.services.clone(), IngestOptions::default())),
        );

        let ctx = StepContext::new(json!({ "subject": "parkeren", "max_results": 3 }))
            .with_run("wf-1", "step-1");
        let output = registry.invoke("ingest", &ctx, "wf-1").await.unwrap();

        let query_id = output.outputs[OUTPUT_QUERY_ID].as_str().unwrap().to_string();
        let ids = output.outputs[OUTPUT_DOCUMENT_IDS].as_array().unwrap();
        assert!(!ids.is_empty());
        assert!(output.outputs[OUTPUT_DIAGNOSTICS].is_null());

        let doc = fx
            .store
            .find_by_id(ids[0].as_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.enrichment_metadata.query_id.as_deref(), Some(query_id.as_str()));
        assert_eq!(doc.enrichment_metadata.workflow_run_id.as_deref(), Some("wf-1"));
        assert_eq!(doc.enrichment_metadata.step_id.as_deref(), Some("step-1"));

        // A later step reuses the tracked query instead of creating another.
        let next = ctx.merge(&output).for_step(json!({ "subject": "parkeren" }), "step-2");
        let again = registry.invoke("ingest", &next, "wf-1").await.unwrap();
        assert_eq!(again.outputs[OUTPUT_QUERY_ID].as_str(), Some(query_id.as_str()));
    }

    #[tokio::test]
    async fn knowledge_and_etl_side_effects_run() {
        let fx = fixture();
        let knowledge = Arc::new(MemoryKnowledgeGraph::new());
        let services = fx
            .services
            .clone()
            .with_knowledge(Arc::new(KnowledgeGraphPopulator::new(knowledge.clone())));
        let dir = std::env::temp_dir().join(format!("ph_test_etl_{}", Uuid::now_v7()));
        let options = IngestOptions {
            etl: Some(EtlEmission {
                dir: dir.clone(),
                nlp_model_id: "nl-core-news-md".into(),
                rdf_mapping_version: "2024.1".into(),
            }),
            ..Default::default()
        };
        let action = IngestSourceAction::new(ten_records(&[]), services, options);

        let outcome = action
            .run(&IngestParams::new("parkeren"), &PipelineContext::default(), "run-5")
            .await
            .unwrap();
        assert!(outcome.side_effect_warnings.is_empty(), "{:?}", outcome.side_effect_warnings);

        let stats = knowledge.stats().await.unwrap();
        assert!(stats.entities > outcome.documents.len());

        let path = outcome.etl_job_path.unwrap();
        let request = policyharvest_shared::etl::load_etl_job_request(&path).unwrap();
        assert_eq!(request.run_id, "run-5");
        assert_eq!(request.input.document_ids.unwrap().len(), 10);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
