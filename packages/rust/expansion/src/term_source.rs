//! Term sources feeding the `auto` expansion strategy.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use policyharvest_shared::{PolicyHarvestError, QueryParams, Result};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

/// User-Agent string for term-source requests.
const USER_AGENT: &str = concat!("PolicyHarvest/", env!("CARGO_PKG_VERSION"));

/// Supplies expansion terms for a subject.
#[async_trait]
pub trait TermSource: Send + Sync {
    /// Short name used to tag the expanded query set.
    fn name(&self) -> &str;

    async fn terms(&self, params: &QueryParams) -> Result<Vec<String>>;
}

/// Synonyms from a configured table, keyed by lowercase subject or theme.
pub struct ThesaurusTermSource {
    table: BTreeMap<String, Vec<String>>,
}

impl ThesaurusTermSource {
    pub fn new(table: BTreeMap<String, Vec<String>>) -> Self {
        let table = table
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        Self { table }
    }
}

#[async_trait]
impl TermSource for ThesaurusTermSource {
    fn name(&self) -> &str {
        "thesaurus"
    }

    async fn terms(&self, params: &QueryParams) -> Result<Vec<String>> {
        let keys = std::iter::once(params.subject.as_str()).chain(params.theme.as_deref());
        Ok(keys
            .filter_map(|k| self.table.get(&k.trim().to_lowercase()))
            .flatten()
            .cloned()
            .collect())
    }
}

/// Remote term service answering `GET <url>?subject=..&theme=..` with
/// `{"terms": [...]}`.
pub struct HttpTermSource {
    client: Client,
    url: Url,
}

#[derive(Deserialize)]
struct TermsResponse {
    #[serde(default)]
    terms: Vec<String>,
}

impl HttpTermSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| PolicyHarvestError::config(format!("invalid term source url '{url}': {e}")))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PolicyHarvestError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl TermSource for HttpTermSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn terms(&self, params: &QueryParams) -> Result<Vec<String>> {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("subject", &params.subject);
            if let Some(theme) = &params.theme {
                query.append_pair("theme", theme);
            }
        }

        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            if e.is_timeout() {
                PolicyHarvestError::Timeout(format!("{url}: {e}"))
            } else {
                PolicyHarvestError::ServiceUnavailable(format!("term source {url}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PolicyHarvestError::ServiceUnavailable(format!(
                "term source {url}: HTTP {status}"
            )));
        }

        let body: TermsResponse = response
            .json()
            .await
            .map_err(|e| PolicyHarvestError::parse(format!("term source {url}: {e}")))?;
        Ok(body.terms)
    }
}

/// Placeholder used when no term source is configured; every lookup fails.
pub struct UnavailableTermSource;

#[async_trait]
impl TermSource for UnavailableTermSource {
    fn name(&self) -> &str {
        "none"
    }

    async fn terms(&self, _params: &QueryParams) -> Result<Vec<String>> {
        Err(PolicyHarvestError::ServiceUnavailable(
            "no term source configured".into(),
        ))
    }
}
