//! Application configuration for PolicyHarvest.
//!
//! User config lives at `~/.policyharvest/policyharvest.toml`.
//! CLI flags override config file values, which override defaults.
//! Runtime value objects (executor, expansion, relationship settings) are
//! derived from [`AppConfig`] by the crates that own them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PolicyHarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "policyharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".policyharvest";

// ---------------------------------------------------------------------------
// Config structs (matching policyharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Batch executor and discovery tunables.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Query expansion.
    #[serde(default)]
    pub expansion: ExpansionSettings,

    /// Relationship builder.
    #[serde(default)]
    pub relationships: RelationshipSettings,

    /// Embedding provider.
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Knowledge graph population and ETL hand-off.
    #[serde(default)]
    pub knowledge_graph: KnowledgeGraphSettings,

    /// Per-source endpoints.
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the document database and graph snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Maximum documents requested per source and run.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_results: default_max_results(),
        }
    }
}

fn default_data_dir() -> String {
    "~/.policyharvest/data".into()
}
fn default_max_results() -> usize {
    50
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum adapter pipelines in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Log aggregate counters every N completions.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Per-fetch timeout.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Stop issuing expanded queries once enough unique results exist.
    #[serde(default = "default_true")]
    pub early_exit: bool,

    /// Early exit fires when unique results exceed `max_results × multiplier`.
    #[serde(default = "default_early_exit_multiplier")]
    pub early_exit_multiplier: f64,

    /// Run expanded queries concurrently instead of one after another.
    #[serde(default)]
    pub parallel_queries: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            progress_every: default_progress_every(),
            fetch_timeout_secs: default_fetch_timeout(),
            early_exit: true,
            early_exit_multiplier: default_early_exit_multiplier(),
            parallel_queries: false,
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_progress_every() -> usize {
    10
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_early_exit_multiplier() -> f64 {
    1.2
}

/// How a subject is turned into discovery queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionStrategy {
    /// Draw extra terms from the configured term source.
    #[default]
    Auto,
    /// Use the literal subject only.
    Single,
}

impl std::str::FromStr for ExpansionStrategy {
    type Err = PolicyHarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "single" => Ok(Self::Single),
            other => Err(PolicyHarvestError::validation(format!(
                "unknown expansion strategy '{other}': expected 'auto' or 'single'"
            ))),
        }
    }
}

/// `[expansion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionSettings {
    #[serde(default)]
    pub strategy: ExpansionStrategy,

    /// Upper bound on generated queries (the subject counts as one).
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Term source kind: "thesaurus", "http", or "none".
    #[serde(default = "default_term_source")]
    pub term_source: String,

    /// Endpoint for the "http" term source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_source_url: Option<String>,

    /// Time budget for one term-source lookup.
    #[serde(default = "default_term_timeout")]
    pub timeout_secs: u64,

    /// Synonym table for the "thesaurus" term source (lowercase keys).
    #[serde(default)]
    pub thesaurus: BTreeMap<String, Vec<String>>,
}

impl Default for ExpansionSettings {
    fn default() -> Self {
        Self {
            strategy: ExpansionStrategy::Auto,
            max_queries: default_max_queries(),
            term_source: default_term_source(),
            term_source_url: None,
            timeout_secs: default_term_timeout(),
            thesaurus: BTreeMap::new(),
        }
    }
}

fn default_max_queries() -> usize {
    5
}
fn default_term_source() -> String {
    "thesaurus".into()
}
fn default_term_timeout() -> u64 {
    10
}

/// `[relationships]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSettings {
    #[serde(default = "default_max_relationships")]
    pub max_relationships: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Also link nodes sharing authority or jurisdiction.
    #[serde(default = "default_true")]
    pub metadata_linking: bool,
}

impl Default for RelationshipSettings {
    fn default() -> Self {
        Self {
            max_relationships: default_max_relationships(),
            similarity_threshold: default_similarity_threshold(),
            metadata_linking: true,
        }
    }
}

fn default_max_relationships() -> usize {
    3
}
fn default_similarity_threshold() -> f32 {
    0.6
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// "hashing" (local, deterministic) or "remote" (OpenAI-compatible API).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_dims")]
    pub dims: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dims: default_dims(),
            endpoint: None,
            model: None,
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".into()
}
fn default_dims() -> usize {
    256
}
fn default_api_key_env() -> String {
    "POLICYHARVEST_EMBEDDING_KEY".into()
}

/// `[knowledge_graph]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraphSettings {
    /// Run entity/relationship extraction after navigation-graph writes.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// When set, an `etl-job@v1` request is written here for every run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etl_job_dir: Option<String>,

    #[serde(default = "default_nlp_model")]
    pub nlp_model_id: String,

    #[serde(default = "default_rdf_mapping")]
    pub rdf_mapping_version: String,
}

impl Default for KnowledgeGraphSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            etl_job_dir: None,
            nlp_model_id: default_nlp_model(),
            rdf_mapping_version: default_rdf_mapping(),
        }
    }
}

fn default_nlp_model() -> String {
    "nl_core_news_md".into()
}
fn default_rdf_mapping() -> String {
    "v1".into()
}

/// `[sources]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub official_publications: OfficialPublicationsConfig,
    #[serde(default)]
    pub judiciary: JudiciaryConfig,
    #[serde(default)]
    pub crawl_index: CrawlIndexConfig,
    #[serde(default)]
    pub municipal: MunicipalConfig,
}

/// `[sources.official_publications]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficialPublicationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SRU search endpoint.
    #[serde(default = "default_sru_url")]
    pub search_url: String,
    /// Document URL with an `{id}` placeholder.
    #[serde(default = "default_publication_url")]
    pub document_url_template: String,
}

impl Default for OfficialPublicationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: default_sru_url(),
            document_url_template: default_publication_url(),
        }
    }
}

fn default_sru_url() -> String {
    "https://repository.overheid.nl/sru".into()
}
fn default_publication_url() -> String {
    "https://zoek.officielebekendmakingen.nl/{id}.xml".into()
}

/// `[sources.judiciary]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudiciaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Atom search feed endpoint.
    #[serde(default = "default_judiciary_search")]
    pub search_url: String,
    /// Decision content endpoint; the ECLI is passed as `id`.
    #[serde(default = "default_judiciary_content")]
    pub content_url: String,
}

impl Default for JudiciaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: default_judiciary_search(),
            content_url: default_judiciary_content(),
        }
    }
}

fn default_judiciary_search() -> String {
    "https://data.rechtspraak.nl/uitspraken/zoeken".into()
}
fn default_judiciary_content() -> String {
    "https://data.rechtspraak.nl/uitspraken/content".into()
}

/// `[sources.crawl_index]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlIndexConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// CDX index endpoint.
    #[serde(default = "default_cdx_url")]
    pub index_url: String,
    /// Replay URL with `{timestamp}` and `{url}` placeholders.
    #[serde(default = "default_replay_url")]
    pub replay_url_template: String,
    /// Domain patterns queried when the request names no authority site.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl Default for CrawlIndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_url: default_cdx_url(),
            replay_url_template: default_replay_url(),
            domains: Vec::new(),
        }
    }
}

fn default_cdx_url() -> String {
    "https://index.commoncrawl.org/CC-MAIN-2024-33-index".into()
}
fn default_replay_url() -> String {
    "https://web.archive.org/web/{timestamp}id_/{url}".into()
}

/// `[sources.municipal]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MunicipalConfig {
    #[serde(default)]
    pub sites: Vec<MunicipalSite>,
}

/// `[[sources.municipal.sites]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MunicipalSite {
    pub name: String,
    pub start_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.policyharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PolicyHarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.policyharvest/policyharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PolicyHarvestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PolicyHarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject tunables that would make the pipeline misbehave.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.pipeline.concurrency == 0 {
        return Err(PolicyHarvestError::config("pipeline.concurrency must be > 0"));
    }
    if config.pipeline.early_exit_multiplier < 1.0 {
        return Err(PolicyHarvestError::config(
            "pipeline.early_exit_multiplier must be >= 1.0",
        ));
    }
    if config.expansion.max_queries == 0 {
        return Err(PolicyHarvestError::config("expansion.max_queries must be >= 1"));
    }
    if !(0.0..=1.0).contains(&config.relationships.similarity_threshold) {
        return Err(PolicyHarvestError::config(
            "relationships.similarity_threshold must be in [0.0, 1.0]",
        ));
    }
    match config.embedding.provider.as_str() {
        "hashing" | "remote" => {}
        other => {
            return Err(PolicyHarvestError::config(format!(
                "unknown embedding provider '{other}': expected 'hashing' or 'remote'"
            )));
        }
    }
    if config.embedding.provider == "remote" && config.embedding.endpoint.is_none() {
        return Err(PolicyHarvestError::config(
            "embedding.endpoint must be set when provider is 'remote'",
        ));
    }
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PolicyHarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PolicyHarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PolicyHarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
