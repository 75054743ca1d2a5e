//! Municipal website adapter: follows topic links from configured start
//! pages and extracts the linked policy pages.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use policyharvest_shared::{
    CanonicalDocumentDraft, DocumentSource, Extension, MunicipalSite, PolicyHarvestError, Result,
};
use reqwest::Client;
use scraper::Html;
use serde_json::json;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::html::{self, is_ssrf_target, normalize_url};
use crate::{ArtifactBundle, DiscoveryRecord, DiscoverySeed, SourceAdapter, http, keywords};

/// Outbound links kept on the web extension.
const MAX_OUTBOUND_LINKS: usize = 50;

pub struct MunicipalAdapter {
    client: Client,
    sites: Vec<MunicipalSite>,
    timeout: Duration,
    allow_localhost: bool,
}

/// A fetched municipal page.
#[derive(Debug, Clone)]
pub struct MunicipalPage {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub text: String,
    pub published_at: Option<NaiveDate>,
    pub site: Option<String>,
    pub authority: Option<String>,
    pub jurisdiction: Option<String>,
    pub outbound_links: Vec<String>,
    pub http_status: u16,
}

impl MunicipalAdapter {
    pub fn new(sites: &[MunicipalSite], timeout: Duration) -> Result<Self> {
        for site in sites {
            Url::parse(&site.start_url).map_err(|e| {
                PolicyHarvestError::config(format!(
                    "municipal site '{}' has invalid start url: {e}",
                    site.name
                ))
            })?;
        }
        Ok(Self {
            client: http::build_client()?,
            sites: sites.to_vec(),
            timeout,
            allow_localhost: false,
        })
    }

    /// Allow localhost URLs (for testing only).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    fn blocked(&self, url: &Url) -> bool {
        !self.allow_localhost && is_ssrf_target(url)
    }

    /// Sites matching the requested authority or jurisdiction; every site
    /// when the request names neither or nothing matches.
    fn sites_for(&self, seed: &DiscoverySeed) -> Vec<&MunicipalSite> {
        let wanted: Vec<String> = [&seed.params.authority, &seed.params.jurisdiction]
            .into_iter()
            .flatten()
            .map(|w| w.to_lowercase())
            .collect();
        let matches = |site: &MunicipalSite| {
            [Some(&site.name), site.authority.as_ref(), site.jurisdiction.as_ref()]
                .into_iter()
                .flatten()
                .any(|field| wanted.contains(&field.to_lowercase()))
        };

        let selected: Vec<&MunicipalSite> = self.sites.iter().filter(|s| matches(*s)).collect();
        if selected.is_empty() {
            self.sites.iter().collect()
        } else {
            selected
        }
    }

    async fn discover_site(
        &self,
        site: &MunicipalSite,
        words: &[String],
        seen: &mut HashSet<String>,
    ) -> Result<Vec<DiscoveryRecord>> {
        let start = Url::parse(&site.start_url)
            .map_err(|e| PolicyHarvestError::config(format!("{}: {e}", site.start_url)))?;
        if self.blocked(&start) {
            warn!(site = %site.name, url = %start, "start url blocked by SSRF guard");
            return Ok(Vec::new());
        }

        let body = http::fetch_text(&self.client, start.as_str(), self.timeout).await?;
        let links = {
            let doc = Html::parse_document(&body);
            html::extract_links(&doc, &start)
        };

        let mut out = Vec::new();
        for link in links {
            if link.url.host_str() != start.host_str() || self.blocked(&link.url) {
                continue;
            }
            let haystack = format!("{} {}", link.url.path(), link.text).to_lowercase();
            if !words.is_empty() && !words.iter().any(|w| haystack.contains(w.as_str())) {
                continue;
            }
            let normalized = normalize_url(&link.url);
            if !seen.insert(normalized.clone()) {
                continue;
            }

            let mut record = DiscoveryRecord::new(normalized, link.url.to_string());
            record.title_hint = Some(link.text).filter(|t| !t.is_empty());
            record.metadata = json!({
                "site": site.name,
                "authority": site.authority,
                "jurisdiction": site.jurisdiction,
            });
            out.push(record);
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for MunicipalAdapter {
    type Extracted = MunicipalPage;

    fn source(&self) -> DocumentSource {
        DocumentSource::Municipal
    }

    fn needs_query_expansion(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(query = %seed.query))]
    async fn discover(&self, seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>> {
        let words = keywords(&seed.query);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut reached = 0usize;
        let mut first_error = None;
        for site in self.sites_for(seed) {
            match self.discover_site(site, &words, &mut seen).await {
                Ok(found) => {
                    reached += 1;
                    out.extend(found);
                }
                Err(e) => {
                    warn!(site = %site.name, error = %e, "municipal site skipped");
                    first_error.get_or_insert(e);
                    continue;
                }
            }
            if out.len() >= seed.max_results {
                break;
            }
        }
        if reached == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        out.truncate(seed.max_results);
        debug!(count = out.len(), "municipal pages discovered");
        Ok(out)
    }

    async fn acquire(&self, record: &DiscoveryRecord) -> Result<ArtifactBundle> {
        let url = Url::parse(&record.url)
            .map_err(|e| PolicyHarvestError::validation(format!("{}: {e}", record.url)))?;
        if self.blocked(&url) {
            return Err(PolicyHarvestError::validation(format!(
                "{url}: refusing to fetch private or non-http address"
            )));
        }
        http::fetch_artifact(&self.client, self.source(), record, &record.url, self.timeout).await
    }

    fn extract(&self, bundle: &ArtifactBundle) -> Result<MunicipalPage> {
        let record = &bundle.record;
        let base = Url::parse(&bundle.url)
            .map_err(|e| PolicyHarvestError::parse(format!("{}: {e}", bundle.url)))?;
        let doc = Html::parse_document(&bundle.text());

        let text = html::main_text(&doc);
        if text.is_empty() {
            return Err(PolicyHarvestError::parse(format!(
                "{}: page has no readable text",
                record.source_id
            )));
        }

        let mut seen = HashSet::new();
        let outbound_links = html::extract_links(&doc, &base)
            .into_iter()
            .filter(|l| l.url.host_str() != base.host_str())
            .map(|l| normalize_url(&l.url))
            .filter(|u| seen.insert(u.clone()))
            .take(MAX_OUTBOUND_LINKS)
            .collect();

        Ok(MunicipalPage {
            url: record.source_id.clone(),
            domain: base.host_str().unwrap_or_default().to_string(),
            title: html::page_title(&doc).unwrap_or_default(),
            text,
            published_at: html::published_date(&doc),
            site: record.meta_str("site").map(str::to_string),
            authority: record.meta_str("authority").map(str::to_string),
            jurisdiction: record.meta_str("jurisdiction").map(str::to_string),
            outbound_links,
            http_status: bundle.http_status,
        })
    }

    fn map(&self, page: &MunicipalPage) -> CanonicalDocumentDraft {
        let mut draft = CanonicalDocumentDraft::new(
            self.source(),
            page.url.clone(),
            page.url.clone(),
            page.title.clone(),
            page.text.clone(),
        );
        draft.publisher_authority = page.authority.clone();
        draft.document_family = Some("web_page".into());
        draft.dates.published_at = page.published_at;
        draft.source_metadata = json!({
            "site": page.site,
            "jurisdiction": page.jurisdiction,
        });
        draft
    }

    fn extensions(&self, page: &MunicipalPage) -> Vec<Extension> {
        vec![Extension::Web {
            domain: page.domain.clone(),
            outbound_links: page.outbound_links.clone(),
            http_status: Some(page.http_status),
        }]
    }
}
