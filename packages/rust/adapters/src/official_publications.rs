//! Official-publications registry adapter (SRU search over XML publications).

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use policyharvest_shared::{
    CanonicalDocumentDraft, DocumentSource, Extension, PolicyHarvestError, Result,
    config::OfficialPublicationsConfig,
};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    ArtifactBundle, DiscoveryRecord, DiscoverySeed, SourceAdapter, http, parse_date, xml,
};

/// Containers holding the operative text of a publication.
const BODY_CONTAINERS: &[&str] = &[
    "regeling",
    "zakelijke-mededeling",
    "circulaire",
    "kamerstuk",
    "besluit",
    "body",
];

/// Elements carrying the official title, most specific first.
const TITLE_ELEMENTS: &[&str] = &["officiele-titel", "citeertitel", "titel", "title"];

pub struct OfficialPublicationsAdapter {
    client: Client,
    search_url: Url,
    document_url_template: String,
    timeout: Duration,
}

/// A parsed publication.
#[derive(Debug, Clone)]
pub struct Publication {
    pub identifier: String,
    pub url: String,
    pub title: String,
    pub text: String,
    pub authority: Option<String>,
    pub jurisdiction: Option<String>,
    pub official_type: Option<String>,
    pub published_at: Option<NaiveDate>,
}

impl Publication {
    /// `gmb-2024-12345` → `2024-12345`.
    pub fn publication_number(&self) -> Option<String> {
        self.identifier
            .split_once('-')
            .map(|(_, number)| number.to_string())
            .filter(|n| n.chars().any(|c| c.is_ascii_digit()))
    }
}

impl OfficialPublicationsAdapter {
    pub fn new(config: &OfficialPublicationsConfig, timeout: Duration) -> Result<Self> {
        let search_url = Url::parse(&config.search_url).map_err(|e| {
            PolicyHarvestError::config(format!("invalid SRU url '{}': {e}", config.search_url))
        })?;
        Ok(Self {
            client: http::build_client()?,
            search_url,
            document_url_template: config.document_url_template.clone(),
            timeout,
        })
    }

    fn cql(seed: &DiscoverySeed) -> String {
        let escape = |s: &str| s.replace('"', "");
        let mut cql = format!("cql.textAndIndexes=\"{}\"", escape(&seed.query));
        if let Some(authority) = &seed.params.authority {
            cql.push_str(&format!(" AND dt.creator=\"{}\"", escape(authority)));
        }
        if let Some(from) = seed.params.date_range.from {
            cql.push_str(&format!(" AND dt.available>=\"{from}\""));
        }
        if let Some(to) = seed.params.date_range.to {
            cql.push_str(&format!(" AND dt.available<=\"{to}\""));
        }
        cql
    }

    fn document_url(&self, identifier: &str) -> String {
        self.document_url_template.replace("{id}", identifier)
    }
}

#[async_trait]
impl SourceAdapter for OfficialPublicationsAdapter {
    type Extracted = Publication;

    fn source(&self) -> DocumentSource {
        DocumentSource::OfficialPublications
    }

    fn needs_query_expansion(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(query = %seed.query))]
    async fn discover(&self, seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>> {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("operation", "searchRetrieve")
            .append_pair("version", "2.0")
            .append_pair("query", &Self::cql(seed))
            .append_pair("maximumRecords", &seed.max_results.max(1).to_string());

        let body = http::fetch_text(&self.client, url.as_str(), self.timeout).await?;
        let mut out = Vec::new();
        for rec in xml::records(&body, "record")? {
            let Some(identifier) = rec.first("identifier") else {
                continue;
            };
            let doc_url = rec
                .first_where("itemUrl", "manifestation", "xml")
                .map(str::to_string)
                .unwrap_or_else(|| self.document_url(identifier));

            let mut record = DiscoveryRecord::new(identifier, doc_url);
            record.title_hint = rec.first("title").map(str::to_string);
            record.metadata = json!({
                "authority": rec.first("creator"),
                "jurisdiction": rec.first("spatial"),
                "official_type": rec.first("type"),
                "date": rec.first("available").or_else(|| rec.first("modified")),
                "preferred_url": rec.first("preferredUrl"),
            });
            out.push(record);
        }
        out.truncate(seed.max_results);
        debug!(count = out.len(), "SRU records discovered");
        Ok(out)
    }

    async fn acquire(&self, record: &DiscoveryRecord) -> Result<ArtifactBundle> {
        http::fetch_artifact(&self.client, self.source(), record, &record.url, self.timeout).await
    }

    fn extract(&self, bundle: &ArtifactBundle) -> Result<Publication> {
        let raw = bundle.text();
        let doc = xml::document(&raw)?;
        let record = &bundle.record;

        let title = TITLE_ELEMENTS
            .iter()
            .find_map(|name| doc.first(name))
            .map(str::to_string)
            .unwrap_or_default();
        let text = xml::text_within(&raw, BODY_CONTAINERS)?;
        if text.is_empty() {
            return Err(PolicyHarvestError::parse(format!(
                "{}: publication has no text",
                record.source_id
            )));
        }

        Ok(Publication {
            identifier: record.source_id.clone(),
            url: record
                .meta_str("preferred_url")
                .unwrap_or(&bundle.url)
                .to_string(),
            title,
            text,
            authority: record
                .meta_str("authority")
                .or_else(|| doc.first("creator"))
                .map(str::to_string),
            jurisdiction: record.meta_str("jurisdiction").map(str::to_string),
            official_type: record
                .meta_str("official_type")
                .or_else(|| doc.first("type"))
                .map(str::to_string),
            published_at: record
                .meta_str("date")
                .or_else(|| doc.first("available"))
                .and_then(parse_date),
        })
    }

    fn map(&self, p: &Publication) -> CanonicalDocumentDraft {
        let mut draft = CanonicalDocumentDraft::new(
            self.source(),
            p.identifier.clone(),
            p.url.clone(),
            p.title.clone(),
            p.text.clone(),
        );
        draft.publisher_authority = p.authority.clone();
        draft.document_family = Some("official_publication".into());
        draft.document_type = p.official_type.clone();
        draft.dates.published_at = p.published_at;
        draft.source_metadata = json!({
            "jurisdiction": p.jurisdiction,
            "publication_number": p.publication_number(),
        });
        draft
    }

    fn extensions(&self, p: &Publication) -> Vec<Extension> {
        vec![Extension::Publication {
            publication_number: p.publication_number(),
            official_type: p.official_type.clone(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PipelineContext, run_pipeline};
    use policyharvest_shared::QueryParams;
    use policyharvest_storage::{DocumentStore, MemoryStore};

    fn sru_response(base: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sru:searchRetrieveResponse xmlns:sru="http://docs.oasis-open.org/ns/search-ws/sruResponse"
    xmlns:dcterms="http://purl.org/dc/terms/" xmlns:overheid="http://standaarden.overheid.nl/owms/terms/">
  <sru:numberOfRecords>2</sru:numberOfRecords>
  <sru:records>
    <sru:record><sru:recordData><gzd><originalData><meta><owmskern>
      <dcterms:identifier>gmb-2024-101</dcterms:identifier>
      <dcterms:title>Parkeerverordening 2024</dcterms:title>
      <dcterms:type>Verordening</dcterms:type>
      <dcterms:creator>Gemeente Voorbeeld</dcterms:creator>
      <dcterms:spatial>Voorbeeld</dcterms:spatial>
    </owmskern><owmsmantel><dcterms:available>2024-02-01</dcterms:available></owmsmantel></meta></originalData>
    <enrichedData>
      <preferredUrl>https://zoek.example/gmb-2024-101.html</preferredUrl>
      <itemUrl manifestation="xml">{base}/docs/gmb-2024-101.xml</itemUrl>
    </enrichedData></gzd></sru:recordData></sru:record>
    <sru:record><sru:recordData><gzd><originalData><meta><owmskern>
      <dcterms:identifier>gmb-2024-102</dcterms:identifier>
      <dcterms:title>Besluit tarieven | gmb-2024-102</dcterms:title>
    </owmskern></meta></originalData></gzd></sru:recordData></sru:record>
  </sru:records>
</sru:searchRetrieveResponse>"#
        )
    }

    fn document(title: &str, first_article: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<gemeenteblad>
  <meta><officiele-titel>{title}</officiele-titel></meta>
  <regeling>
    <al>Artikel 1. {first_article}</al>
    <al>Artikel 2. Het college stelt tarieven vast.</al>
  </regeling>
</gemeenteblad>"#
        )
    }

    fn adapter(server: &wiremock::MockServer) -> OfficialPublicationsAdapter {
        let config = OfficialPublicationsConfig {
            enabled: true,
            search_url: format!("{}/sru", server.uri()),
            document_url_template: format!("{}/docs/{{id}}.xml", server.uri()),
        };
        OfficialPublicationsAdapter::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn seed(query: &str) -> DiscoverySeed {
        DiscoverySeed {
            query: query.into(),
            params: QueryParams {
                subject: query.into(),
                authority: Some("Gemeente Voorbeeld".into()),
                ..Default::default()
            },
            max_results: 10,
        }
    }

    #[test]
    fn cql_includes_filters() {
        let mut s = seed("parkeren");
        s.params.date_range.from = NaiveDate::from_ymd_opt(2024, 1, 1);
        let cql = OfficialPublicationsAdapter::cql(&s);
        assert_eq!(
            cql,
            r#"cql.textAndIndexes="parkeren" AND dt.creator="Gemeente Voorbeeld" AND dt.available>="2024-01-01""#
        );
    }

    #[tokio::test]
    async fn discover_parses_sru_records() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/sru"))
            .and(wiremock::matchers::query_param("operation", "searchRetrieve"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(sru_response(&server.uri())))
            .mount(&server)
            .await;

        let records = adapter(&server).discover(&seed("parkeren")).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_id, "gmb-2024-101");
        assert_eq!(records[0].url, format!("{}/docs/gmb-2024-101.xml", server.uri()));
        assert_eq!(records[0].meta_str("authority"), Some("Gemeente Voorbeeld"));
        // No itemUrl: falls back to the template.
        assert_eq!(records[1].url, format!("{}/docs/gmb-2024-102.xml", server.uri()));
    }

    #[tokio::test]
    async fn full_pipeline_produces_publication() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/sru"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(sru_response(&server.uri())))
            .mount(&server)
            .await;
        let bodies = [
            (
                "gmb-2024-101",
                document(
                    "Parkeerverordening Voorbeeld 2024",
                    "In deze verordening wordt verstaan onder parkeren: het laten staan van een voertuig.",
                ),
            ),
            (
                "gmb-2024-102",
                document("Tarievenbesluit", "De tarieven voor 2024 zijn vastgesteld."),
            ),
        ];
        for (id, body) in bodies {
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .and(wiremock::matchers::path(format!("/docs/{id}.xml")))
                .respond_with(
                    wiremock::ResponseTemplate::new(200)
                        .insert_header("content-type", "application/xml")
                        .set_body_string(body),
                )
                .mount(&server)
                .await;
        }

        let adapter = adapter(&server);
        let records = adapter.discover(&seed("parkeren")).await.unwrap();
        let store = MemoryStore::new();
        let ctx = PipelineContext::default();

        let id = run_pipeline(&adapter, &records[0], &ctx, &store).await.unwrap();
        let doc = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(doc.title, "Parkeerverordening Voorbeeld 2024");
        assert_eq!(doc.canonical_url, "https://zoek.example/gmb-2024-101.html");
        assert_eq!(doc.publisher_authority.as_deref(), Some("Gemeente Voorbeeld"));
        assert_eq!(doc.document_type.as_deref(), Some("Verordening"));
        assert_eq!(doc.dates.published_at, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(doc.jurisdiction(), Some("Voorbeeld"));
        assert!(doc.full_text.starts_with("Artikel 1."));
        assert_eq!(
            doc.extensions,
            vec![Extension::Publication {
                publication_number: Some("2024-101".into()),
                official_type: Some("Verordening".into()),
            }]
        );

        // The second record's hint carries a separator and wins over the body title.
        let id = run_pipeline(&adapter, &records[1], &ctx, &store).await.unwrap();
        let doc = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(doc.title, "Besluit tarieven | gmb-2024-102");
    }

    #[tokio::test]
    async fn search_outage_is_network_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = adapter(&server).discover(&seed("parkeren")).await.unwrap_err();
        assert!(matches!(err, PolicyHarvestError::Network(_)));
    }
}
