//! Crawl-index adapter: CDX capture lookup plus replay of archived pages.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use policyharvest_shared::{
    CanonicalDocumentDraft, DocumentSource, Extension, PolicyHarvestError, Result,
    config::CrawlIndexConfig,
};
use reqwest::Client;
use scraper::Html;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    ArtifactBundle, DiscoveryRecord, DiscoverySeed, SourceAdapter, html, http, keywords,
    parse_date,
};

/// Captures requested per domain for each wanted result; most are filtered
/// out by keyword.
const OVERFETCH: usize = 4;

/// One line of CDX JSON output.
#[derive(Debug, Clone, Deserialize)]
struct CdxLine {
    url: String,
    timestamp: String,
    #[serde(default)]
    mime: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    filename: Option<String>,
}

impl CdxLine {
    fn is_html_ok(&self) -> bool {
        self.status == "200" && self.mime.contains("html")
    }
}

pub struct CrawlIndexAdapter {
    client: Client,
    index_url: Url,
    replay_url_template: String,
    domains: Vec<String>,
    timeout: Duration,
}

/// An archived web page.
#[derive(Debug, Clone)]
pub struct CapturedPage {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub text: String,
    pub published_at: Option<NaiveDate>,
    pub timestamp: String,
    pub digest: String,
    pub mime: String,
    pub status: u16,
    pub warc_filename: Option<String>,
}

impl CrawlIndexAdapter {
    pub fn new(config: &CrawlIndexConfig, timeout: Duration) -> Result<Self> {
        let index_url = Url::parse(&config.index_url).map_err(|e| {
            PolicyHarvestError::config(format!("invalid CDX url '{}': {e}", config.index_url))
        })?;
        Ok(Self {
            client: http::build_client()?,
            index_url,
            replay_url_template: config.replay_url_template.clone(),
            domains: config.domains.clone(),
            timeout,
        })
    }

    /// An authority given as a bare host name narrows the lookup to that site.
    fn domains_for(&self, seed: &DiscoverySeed) -> Vec<String> {
        match seed.params.authority.as_deref().map(str::trim) {
            Some(a) if a.contains('.') && !a.contains(char::is_whitespace) => vec![a.to_string()],
            _ => self.domains.clone(),
        }
    }

    fn replay_url(&self, timestamp: &str, url: &str) -> String {
        self.replay_url_template
            .replace("{timestamp}", timestamp)
            .replace("{url}", url)
    }

    async fn captures(&self, domain: &str, limit: usize) -> Result<Vec<CdxLine>> {
        let mut url = self.index_url.clone();
        url.query_pairs_mut()
            .append_pair("url", &format!("{domain}/*"))
            .append_pair("output", "json")
            .append_pair("limit", &limit.to_string());

        let body = http::fetch_text(&self.client, url.as_str(), self.timeout).await?;
        let mut lines = Vec::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<CdxLine>(line) {
                Ok(cdx) => lines.push(cdx),
                Err(e) => debug!(error = %e, "skipping unparseable CDX line"),
            }
        }
        Ok(lines)
    }
}

/// Keep the newest capture per URL, drop repeated digests and captures that
/// match none of the keywords.
fn select_captures(lines: Vec<CdxLine>, keywords: &[String]) -> Vec<CdxLine> {
    let mut newest: BTreeMap<String, CdxLine> = BTreeMap::new();
    for line in lines.into_iter().filter(CdxLine::is_html_ok) {
        let lower = line.url.to_lowercase();
        if !keywords.is_empty() && !keywords.iter().any(|k| lower.contains(k.as_str())) {
            continue;
        }
        match newest.get(&line.url) {
            Some(seen) if seen.timestamp >= line.timestamp => {}
            _ => {
                newest.insert(line.url.clone(), line);
            }
        }
    }

    let mut digests = HashSet::new();
    newest
        .into_values()
        .filter(|l| l.digest.is_empty() || digests.insert(l.digest.clone()))
        .collect()
}

#[async_trait]
impl SourceAdapter for CrawlIndexAdapter {
    type Extracted = CapturedPage;

    fn source(&self) -> DocumentSource {
        DocumentSource::CrawlIndex
    }

    fn needs_query_expansion(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(query = %seed.query))]
    async fn discover(&self, seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>> {
        let domains = self.domains_for(seed);
        if domains.is_empty() {
            warn!("no crawl-index domains configured; nothing to discover");
            return Ok(Vec::new());
        }

        let words = keywords(&seed.query);
        let limit = seed.max_results.max(1) * OVERFETCH;
        let mut out = Vec::new();
        let mut reached = 0usize;
        let mut first_error = None;
        for domain in &domains {
            let lines = match self.captures(domain, limit).await {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(%domain, error = %e, "crawl-index domain skipped");
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            reached += 1;
            for cdx in select_captures(lines, &words) {
                let mut record =
                    DiscoveryRecord::new(cdx.url.clone(), self.replay_url(&cdx.timestamp, &cdx.url));
                record.metadata = json!({
                    "domain": domain,
                    "timestamp": cdx.timestamp,
                    "digest": cdx.digest,
                    "mime": cdx.mime,
                    "status": cdx.status,
                    "filename": cdx.filename,
                });
                out.push(record);
            }
        }
        if reached == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        out.truncate(seed.max_results);
        debug!(count = out.len(), domains = domains.len(), "captures discovered");
        Ok(out)
    }

    async fn acquire(&self, record: &DiscoveryRecord) -> Result<ArtifactBundle> {
        http::fetch_artifact(&self.client, self.source(), record, &record.url, self.timeout).await
    }

    fn extract(&self, bundle: &ArtifactBundle) -> Result<CapturedPage> {
        let record = &bundle.record;
        let doc = Html::parse_document(&bundle.text());
        let text = html::main_text(&doc);
        if text.is_empty() {
            return Err(PolicyHarvestError::parse(format!(
                "{}: capture has no readable text",
                record.source_id
            )));
        }

        let timestamp = record.meta_str("timestamp").unwrap_or_default().to_string();
        let domain = Url::parse(&record.source_id)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .or_else(|| record.meta_str("domain").map(str::to_string))
            .unwrap_or_default();

        Ok(CapturedPage {
            url: record.source_id.clone(),
            domain,
            title: html::page_title(&doc).unwrap_or_default(),
            published_at: html::published_date(&doc).or_else(|| parse_date(&timestamp)),
            text,
            digest: record.meta_str("digest").unwrap_or_default().to_string(),
            mime: record
                .meta_str("mime")
                .unwrap_or(&bundle.content_type)
                .to_string(),
            status: record
                .meta_str("status")
                .and_then(|s| s.parse().ok())
                .unwrap_or(bundle.http_status),
            warc_filename: record.meta_str("filename").map(str::to_string),
            timestamp,
        })
    }

    fn map(&self, page: &CapturedPage) -> CanonicalDocumentDraft {
        let mut draft = CanonicalDocumentDraft::new(
            self.source(),
            page.url.clone(),
            page.url.clone(),
            page.title.clone(),
            page.text.clone(),
        );
        draft.document_family = Some("web_page".into());
        draft.dates.published_at = page.published_at;
        draft.source_metadata = json!({
            "domain": page.domain,
            "capture_timestamp": page.timestamp,
        });
        draft
    }

    fn extensions(&self, page: &CapturedPage) -> Vec<Extension> {
        vec![Extension::Crawl {
            timestamp: page.timestamp.clone(),
            digest: page.digest.clone(),
            mime: page.mime.clone(),
            status: page.status,
            warc_filename: page.warc_filename.clone(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PipelineContext, run_pipeline};
    use policyharvest_shared::QueryParams;
    use policyharvest_storage::{DocumentStore, MemoryStore};

    const CDX: &str = r#"{"urlkey":"nl,voorbeeld)/beleid/parkeren","timestamp":"20230101000000","url":"https://voorbeeld.nl/beleid/parkeren","mime":"text/html","status":"200","digest":"AAA","filename":"crawl-1.warc.gz"}
{"urlkey":"nl,voorbeeld)/beleid/parkeren","timestamp":"20240105101500","url":"https://voorbeeld.nl/beleid/parkeren","mime":"text/html","status":"200","digest":"BBB","filename":"crawl-2.warc.gz"}
{"urlkey":"nl,voorbeeld)/parkeren-kopie","timestamp":"20240105101600","url":"https://voorbeeld.nl/parkeren-kopie","mime":"text/html","status":"200","digest":"BBB"}
{"urlkey":"nl,voorbeeld)/afval","timestamp":"20240105101700","url":"https://voorbeeld.nl/afval","mime":"text/html","status":"200","digest":"CCC"}
{"urlkey":"nl,voorbeeld)/parkeren.pdf","timestamp":"20240105101800","url":"https://voorbeeld.nl/parkeren.pdf","mime":"application/pdf","status":"200","digest":"DDD"}
not json
"#;

    const PAGE: &str = r#"<html><head><title>Parkeren | Gemeente Voorbeeld</title></head>
<body><nav><a href="/">Home</a></nav>
<main><h1>Parkeerbeleid</h1><p>Bewoners kunnen een parkeervergunning aanvragen.</p></main>
<footer>Contact</footer></body></html>"#;

    fn adapter(server: &wiremock::MockServer, domains: &[&str]) -> CrawlIndexAdapter {
        let config = CrawlIndexConfig {
            enabled: true,
            index_url: format!("{}/cdx", server.uri()),
            replay_url_template: format!("{}/web/{{timestamp}}id_/{{url}}", server.uri()),
            domains: domains.iter().map(|d| d.to_string()).collect(),
        };
        CrawlIndexAdapter::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn seed(query: &str) -> DiscoverySeed {
        DiscoverySeed {
            query: query.into(),
            params: QueryParams {
                subject: query.into(),
                ..Default::default()
            },
            max_results: 10,
        }
    }

    fn line(url: &str, ts: &str, digest: &str) -> CdxLine {
        CdxLine {
            url: url.into(),
            timestamp: ts.into(),
            mime: "text/html".into(),
            status: "200".into(),
            digest: digest.into(),
            filename: None,
        }
    }

    #[test]
    fn selection_keeps_newest_unique_capture() {
        let lines = vec![
            line("https://a.nl/parkeren", "2023", "X"),
            line("https://a.nl/parkeren", "2024", "Y"),
            line("https://a.nl/parkeren-oud", "2024", "Y"),
            line("https://a.nl/afval", "2024", "Z"),
        ];
        let kept = select_captures(lines, &["parkeren".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].timestamp, "2024");
        assert_eq!(kept[0].digest, "Y");
    }

    #[test]
    fn host_like_authority_narrows_domains() {
        let server_less = CrawlIndexAdapter::new(&CrawlIndexConfig::default(), Duration::from_secs(1))
            .unwrap();
        let mut s = seed("parkeren");
        assert!(server_less.domains_for(&s).is_empty());
        s.params.authority = Some("gemeente.example.nl".into());
        assert_eq!(server_less.domains_for(&s), vec!["gemeente.example.nl"]);
        s.params.authority = Some("Gemeente Voorbeeld".into());
        assert!(server_less.domains_for(&s).is_empty());
    }

    #[tokio::test]
    async fn discover_filters_cdx_lines() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/cdx"))
            .and(wiremock::matchers::query_param("url", "voorbeeld.nl/*"))
            .and(wiremock::matchers::query_param("output", "json"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(CDX))
            .mount(&server)
            .await;

        let records = adapter(&server, &["voorbeeld.nl"])
            .discover(&seed("parkeren"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_id, "https://voorbeeld.nl/beleid/parkeren");
        assert_eq!(records[0].meta_str("timestamp"), Some("20240105101500"));
        assert_eq!(
            records[0].url,
            format!(
                "{}/web/20240105101500id_/https://voorbeeld.nl/beleid/parkeren",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn failing_domain_is_skipped() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/cdx"))
            .and(wiremock::matchers::query_param("url", "kapot.nl/*"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/cdx"))
            .and(wiremock::matchers::query_param("url", "voorbeeld.nl/*"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(CDX))
            .mount(&server)
            .await;

        let records = adapter(&server, &["kapot.nl", "voorbeeld.nl"])
            .discover(&seed("parkeren"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].meta_str("domain"), Some("voorbeeld.nl"));

        let err = adapter(&server, &["kapot.nl"])
            .discover(&seed("parkeren"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyHarvestError::Network(_)));
    }

    #[tokio::test]
    async fn no_domains_discovers_nothing() {
        let server = wiremock::MockServer::start().await;
        let records = adapter(&server, &[]).discover(&seed("parkeren")).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn capture_is_replayed_and_mapped() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/cdx"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(CDX))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path_regex(r"^/web/20240105101500id_/"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(PAGE),
            )
            .mount(&server)
            .await;

        let adapter = adapter(&server, &["voorbeeld.nl"]);
        let records = adapter.discover(&seed("parkeren")).await.unwrap();
        let store = MemoryStore::new();
        let id = run_pipeline(&adapter, &records[0], &PipelineContext::default(), &store)
            .await
            .unwrap();

        let doc = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(doc.title, "Parkeerbeleid");
        assert_eq!(doc.canonical_url, "https://voorbeeld.nl/beleid/parkeren");
        assert!(doc.full_text.contains("parkeervergunning"));
        assert!(!doc.full_text.contains("Contact"));
        assert_eq!(doc.dates.published_at, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(
            doc.extensions,
            vec![Extension::Crawl {
                timestamp: "20240105101500".into(),
                digest: "BBB".into(),
                mime: "text/html".into(),
                status: 200,
                warc_filename: Some("crawl-2.warc.gz".into()),
            }]
        );
    }
}
