//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use policyharvest_adapters::AdapterRegistry;
use policyharvest_core::action::{
    OUTPUT_BATCH, OUTPUT_DIAGNOSTICS, OUTPUT_DOCUMENT_IDS, OUTPUT_QUERY_ID, OUTPUT_WARNINGS,
};
use policyharvest_core::{
    ActionRegistry, BatchCounters, BatchProgress, IngestOptions, IngestParams, IngestServices,
    IngestSourceAction, StepContext, StepOutput,
};
use policyharvest_expansion::QueryExpansionService;
use policyharvest_graph::{
    KnowledgeGraph, KnowledgeGraphPopulator, MemoryKnowledgeGraph, MemoryNavigationGraph,
    NavigationGraphStore, RelationshipBuilder, RelationshipConfig, provider_from_config,
};
use policyharvest_shared::etl::{load_etl_job_request, load_etl_job_result, load_etl_manifest};
use policyharvest_shared::{
    AppConfig, DateRange, DocumentSource, QueryParams, expand_home, init_config, load_config,
};
use policyharvest_storage::Storage;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PolicyHarvest: collect policy and legal documents into one corpus.
#[derive(Parser)]
#[command(
    name = "policyharvest",
    version,
    about = "Ingest policy and legal documents from public sources into a canonical corpus.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Discover and ingest documents about a subject.
    Ingest {
        /// What to look for, e.g. "parkeervergunning".
        subject: String,

        /// Sources to query (repeatable). Defaults to every enabled source.
        #[arg(short, long = "source")]
        sources: Vec<DocumentSource>,

        /// Narrowing theme for query expansion.
        #[arg(long)]
        theme: Option<String>,

        /// Publishing authority, e.g. a municipality.
        #[arg(long)]
        authority: Option<String>,

        /// Jurisdiction the documents apply in.
        #[arg(long)]
        jurisdiction: Option<String>,

        /// Earliest publication date (YYYY-MM-DD).
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Latest publication date (YYYY-MM-DD).
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Maximum documents requested per source.
        #[arg(short = 'n', long)]
        max_results: Option<usize>,

        /// Attach results to an existing tracked query.
        #[arg(long)]
        query_id: Option<String>,
    },

    /// List the sources enabled by the current configuration.
    Sources,

    /// Navigation graph inspection.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// Show the run log of a previous ingestion.
    Logs {
        /// Run id printed by `ingest`.
        run_id: String,
    },

    /// ETL hand-off contract tools.
    Etl {
        #[command(subcommand)]
        action: EtlAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum GraphAction {
    /// Print node and edge counts.
    Stats,
}

#[derive(Subcommand)]
pub(crate) enum EtlAction {
    /// Validate an ETL payload against its contract.
    Validate {
        /// Payload kind.
        kind: EtlKind,
        /// JSON file to validate.
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum EtlKind {
    Job,
    Result,
    Manifest,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "policyharvest=info",
        1 => "policyharvest=debug",
        _ => "policyharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest {
            subject,
            sources,
            theme,
            authority,
            jurisdiction,
            from,
            to,
            max_results,
            query_id,
        } => {
            let params = IngestParams {
                query: QueryParams {
                    subject,
                    theme,
                    authority,
                    jurisdiction,
                    date_range: DateRange { from, to },
                },
                query_id,
                max_results,
            };
            cmd_ingest(params, &sources).await
        }
        Command::Sources => cmd_sources().await,
        Command::Graph { action } => match action {
            GraphAction::Stats => cmd_graph_stats().await,
        },
        Command::Logs { run_id } => cmd_logs(&run_id).await,
        Command::Etl { action } => match action {
            EtlAction::Validate { kind, file } => cmd_etl_validate(kind, &file),
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

fn database_path(config: &AppConfig) -> PathBuf {
    expand_home(&config.defaults.data_dir).join("policyharvest.db")
}

fn navigation_path(config: &AppConfig) -> PathBuf {
    expand_home(&config.defaults.data_dir).join("navigation.json")
}

static MISSING: Value = Value::Null;

fn output_value<'a>(output: &'a StepOutput, name: &str) -> &'a Value {
    output.outputs.get(name).unwrap_or(&MISSING)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(params: IngestParams, requested: &[DocumentSource]) -> Result<()> {
    let config = load_config()?;
    let adapters = AdapterRegistry::from_config(&config)?;

    let sources: Vec<DocumentSource> = if requested.is_empty() {
        adapters.sources()
    } else {
        requested.to_vec()
    };
    if sources.is_empty() {
        return Err(eyre!("no sources enabled; check [sources] in the config file"));
    }

    let storage = Arc::new(Storage::open(&database_path(&config)).await?);
    let navigation = Arc::new(MemoryNavigationGraph::open(navigation_path(&config)).await?);
    let expansion = Arc::new(QueryExpansionService::from_config(&config)?);
    let provider = provider_from_config(&config.embedding)?;
    let knowledge = Arc::new(MemoryKnowledgeGraph::new());

    let mut services = IngestServices::new(
        storage.clone(),
        storage.clone(),
        expansion,
        navigation.clone(),
        storage.clone(),
    )
    .with_relationships(Arc::new(RelationshipBuilder::new(
        RelationshipConfig::from(&config),
        provider,
    )));
    if config.knowledge_graph.enabled {
        services = services.with_knowledge(Arc::new(KnowledgeGraphPopulator::new(knowledge.clone())));
    }

    let progress = Arc::new(CliProgress::new()?);
    let options = IngestOptions::from(&config);
    let mut registry = ActionRegistry::new();
    for source in &sources {
        let pipeline = adapters
            .get(*source)
            .ok_or_else(|| eyre!("source '{source}' is not enabled in the config file"))?;
        let action = IngestSourceAction::new(pipeline, services.clone(), options.clone())
            .with_progress(progress.clone());
        registry.register_action(source.as_str(), Arc::new(action));
    }

    let run_id = Uuid::now_v7().to_string();
    info!(run_id = %run_id, subject = %params.query.subject, sources = sources.len(), "starting ingestion");

    let params_json = serde_json::to_value(&params)?;
    let mut ctx = StepContext::new(params_json.clone()).with_run(run_id.as_str(), "init");
    let mut total_documents = 0usize;

    println!();
    for (index, source) in sources.iter().enumerate() {
        progress.start(*source);
        ctx = ctx.for_step(params_json.clone(), format!("step-{}", index + 1));
        let output = registry.invoke(source.as_str(), &ctx, &run_id).await?;
        progress.finish();
        ctx = ctx.merge(&output);

        let documents = output_value(&output, OUTPUT_DOCUMENT_IDS)
            .as_array()
            .map(Vec::len)
            .unwrap_or(0);
        total_documents += documents;
        let failed = output_value(&output, OUTPUT_BATCH)["failed"].as_u64().unwrap_or(0);

        println!(
            "  {:<22} {documents:>4} documents  {failed:>3} failed",
            source.as_str()
        );
        let diagnostics = output_value(&output, OUTPUT_DIAGNOSTICS);
        if !diagnostics.is_null() {
            println!(
                "    degraded ({}): {}",
                diagnostics["kind"].as_str().unwrap_or("unknown"),
                diagnostics["message"].as_str().unwrap_or_default()
            );
            println!("    {}", diagnostics["guidance"].as_str().unwrap_or_default());
        }
        if let Some(warnings) = output_value(&output, OUTPUT_WARNINGS).as_array() {
            for warning in warnings {
                println!("    warning: {}", warning.as_str().unwrap_or_default());
            }
        }
    }

    let nodes = navigation.node_count().await?;
    let kg = knowledge.stats().await?;
    println!();
    println!("  Run:        {run_id}");
    println!(
        "  Query:      {}",
        ctx.get_str(OUTPUT_QUERY_ID).unwrap_or("-")
    );
    println!("  Documents:  {total_documents}");
    println!(
        "  Navigation: {} nodes, {} edges",
        nodes.total, nodes.edges
    );
    if config.knowledge_graph.enabled {
        println!(
            "  Knowledge:  {} entities, {} relations",
            kg.entities, kg.relations
        );
    }
    println!();

    Ok(())
}

async fn cmd_sources() -> Result<()> {
    let config = load_config()?;
    let adapters = AdapterRegistry::from_config(&config)?;
    for source in DocumentSource::ALL {
        match adapters.get(source) {
            Some(pipeline) => println!(
                "  {:<22} enabled   {}{}",
                source.as_str(),
                pipeline.name(),
                if pipeline.needs_query_expansion() {
                    "  (query expansion)"
                } else {
                    ""
                }
            ),
            None => println!("  {:<22} disabled", source.as_str()),
        }
    }
    Ok(())
}

async fn cmd_graph_stats() -> Result<()> {
    let config = load_config()?;
    let path = navigation_path(&config);
    let graph = MemoryNavigationGraph::open(&path).await?;
    let count = graph.node_count().await?;
    println!("  Graph:     {}", path.display());
    println!("  Nodes:     {}", count.total);
    println!("  Documents: {}", count.documents);
    println!("  Pages:     {}", count.pages);
    println!("  Edges:     {}", count.edges);
    Ok(())
}

async fn cmd_logs(run_id: &str) -> Result<()> {
    let config = load_config()?;
    let path = database_path(&config);
    if !path.exists() {
        return Err(eyre!("no database at '{}'; run `policyharvest ingest` first", path.display()));
    }
    let storage = Storage::open_readonly(&path).await?;
    let logs = storage.run_logs(run_id).await?;
    if logs.is_empty() {
        println!("no log entries for run {run_id}");
    }
    for entry in logs {
        println!("{} {:<5} {}", entry.created_at, entry.level, entry.message);
        if let Some(meta) = entry.meta {
            println!("    {meta}");
        }
    }
    Ok(())
}

fn cmd_etl_validate(kind: EtlKind, file: &Path) -> Result<()> {
    let checked = match kind {
        EtlKind::Job => load_etl_job_request(file).map(|r| r.schema_version),
        EtlKind::Result => load_etl_job_result(file).map(|r| r.schema_version),
        EtlKind::Manifest => load_etl_manifest(file).map(|m| m.schema_version),
    };
    match checked {
        Ok(version) => {
            println!("{}: valid {version}", file.display());
            Ok(())
        }
        Err(e) => {
            for violation in &e.errors {
                println!("  {violation}");
            }
            Err(eyre!("{}: {e}", file.display()))
        }
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Batch progress bar driven by executor counters.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} [{bar:30}] {pos}/{len}")?
                .progress_chars("=> ")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        Ok(Self { bar })
    }

    fn start(&self, source: DocumentSource) {
        self.bar.reset();
        self.bar.set_length(0);
        self.bar.set_message(format!("Ingesting {source}"));
        self.bar.enable_steady_tick(std::time::Duration::from_millis(80));
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchProgress for CliProgress {
    fn on_progress(&self, counters: &BatchCounters) {
        self.bar.set_length(counters.total as u64);
        self.bar.set_position(counters.completed as u64);
        if counters.failed > 0 {
            self.bar.set_message(format!("{} failed", counters.failed));
        }
    }
}
