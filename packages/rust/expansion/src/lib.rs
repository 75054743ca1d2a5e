//! Query expansion for sources that under-retrieve on a single query.
//!
//! [`QueryExpansionService::expand`] turns a subject into an ordered,
//! never-empty list of query strings. With [`ExpansionStrategy::Auto`] extra
//! terms come from a pluggable [`TermSource`]; any term-source failure or
//! timeout degrades to the literal subject tagged [`ExpansionSource::Fallback`].

mod term_source;

use std::sync::Arc;
use std::time::Duration;

use policyharvest_shared::{AppConfig, ExpansionStrategy, PolicyHarvestError, QueryParams, Result};
use tracing::{debug, instrument, warn};

pub use term_source::{HttpTermSource, TermSource, ThesaurusTermSource, UnavailableTermSource};

/// Runtime settings for the expansion service.
#[derive(Debug, Clone)]
pub struct ExpansionConfig {
    /// Strategy used when a request does not name one.
    pub default_strategy: ExpansionStrategy,
    /// Upper bound on generated queries, subject included.
    pub max_queries: usize,
    /// Time budget for one term-source lookup.
    pub timeout: Duration,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            default_strategy: ExpansionStrategy::Auto,
            max_queries: 5,
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AppConfig> for ExpansionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_strategy: config.expansion.strategy,
            max_queries: config.expansion.max_queries.max(1),
            timeout: Duration::from_secs(config.expansion.timeout_secs),
        }
    }
}

/// Input to [`QueryExpansionService::expand`].
#[derive(Debug, Clone, Default)]
pub struct ExpansionRequest {
    pub params: QueryParams,
    /// Overrides the configured default strategy.
    pub strategy: Option<ExpansionStrategy>,
}

impl From<QueryParams> for ExpansionRequest {
    fn from(params: QueryParams) -> Self {
        Self {
            params,
            strategy: None,
        }
    }
}

/// Where an expanded query set came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpansionSource {
    /// Strategy `single`: the literal subject only.
    Single,
    /// Terms drawn from the named term source.
    TermSource(String),
    /// Expansion failed; the literal subject only.
    Fallback,
}

impl std::fmt::Display for ExpansionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::TermSource(name) => write!(f, "term_source:{name}"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// An ordered, non-empty set of discovery queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedQueries {
    pub queries: Vec<String>,
    pub source: ExpansionSource,
}

impl ExpandedQueries {
    fn literal(subject: &str, source: ExpansionSource) -> Self {
        Self {
            queries: vec![subject.to_string()],
            source,
        }
    }
}

/// Expands a subject into discovery queries.
pub struct QueryExpansionService {
    config: ExpansionConfig,
    term_source: Arc<dyn TermSource>,
}

impl QueryExpansionService {
    pub fn new(config: ExpansionConfig, term_source: Arc<dyn TermSource>) -> Self {
        Self {
            config,
            term_source,
        }
    }

    /// Build the service and its term source from the application config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = &config.expansion;
        let term_source: Arc<dyn TermSource> = match settings.term_source.as_str() {
            "thesaurus" => Arc::new(ThesaurusTermSource::new(settings.thesaurus.clone())),
            "http" => {
                let url = settings.term_source_url.as_deref().ok_or_else(|| {
                    PolicyHarvestError::config("expansion.term_source_url is required for 'http'")
                })?;
                Arc::new(HttpTermSource::new(
                    url,
                    Duration::from_secs(settings.timeout_secs),
                )?)
            }
            "none" => Arc::new(UnavailableTermSource),
            other => {
                return Err(PolicyHarvestError::config(format!(
                    "unknown term source '{other}': expected 'thesaurus', 'http' or 'none'"
                )));
            }
        };
        Ok(Self::new(ExpansionConfig::from(config), term_source))
    }

    /// Expand a request. Never returns an empty query list.
    #[instrument(skip_all, fields(subject = %request.params.subject))]
    pub async fn expand(&self, request: &ExpansionRequest) -> ExpandedQueries {
        let subject = request.params.subject.trim();
        let strategy = request.strategy.unwrap_or(self.config.default_strategy);

        if strategy == ExpansionStrategy::Single {
            return ExpandedQueries::literal(subject, ExpansionSource::Single);
        }

        let lookup = tokio::time::timeout(self.config.timeout, self.term_source.terms(&request.params));
        let terms = match lookup.await {
            Ok(Ok(terms)) => terms,
            Ok(Err(e)) => {
                warn!(source = self.term_source.name(), error = %e, "term source failed, using subject only");
                return ExpandedQueries::literal(subject, ExpansionSource::Fallback);
            }
            Err(_) => {
                warn!(
                    source = self.term_source.name(),
                    timeout_secs = self.config.timeout.as_secs(),
                    "term source timed out, using subject only"
                );
                return ExpandedQueries::literal(subject, ExpansionSource::Fallback);
            }
        };

        let mut queries: Vec<String> = Vec::new();
        let mut push = |q: String| {
            let q = q.trim().to_string();
            if !q.is_empty() && !queries.iter().any(|e| e.eq_ignore_ascii_case(&q)) {
                queries.push(q);
            }
        };

        push(subject.to_string());
        if let Some(theme) = request.params.theme.as_deref().filter(|t| !t.trim().is_empty()) {
            push(format!("{subject} {}", theme.trim()));
        }
        for term in terms {
            push(term);
        }
        queries.truncate(self.config.max_queries.max(1));

        if queries.is_empty() {
            return ExpandedQueries::literal(subject, ExpansionSource::Fallback);
        }

        debug!(count = queries.len(), source = self.term_source.name(), "expanded subject");
        ExpandedQueries {
            queries,
            source: ExpansionSource::TermSource(self.term_source.name().to_string()),
        }
    }
}
