//! Judiciary decision archive adapter: Atom search feed plus per-ECLI
//! content documents.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use policyharvest_shared::{
    CanonicalDocumentDraft, DocumentSource, Extension, PolicyHarvestError, Result,
    config::JudiciaryConfig,
};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    ArtifactBundle, DiscoveryRecord, DiscoverySeed, SourceAdapter, citations, http, parse_date,
    xml,
};

/// Elements holding the decision text, preferred first.
const TEXT_CONTAINERS: &[&str] = &["uitspraak", "conclusie"];

pub struct JudiciaryAdapter {
    client: Client,
    search_url: Url,
    content_url: Url,
    timeout: Duration,
}

/// A parsed court decision.
#[derive(Debug, Clone)]
pub struct Decision {
    pub ecli: String,
    pub url: String,
    pub title: String,
    pub text: String,
    pub court: Option<String>,
    pub decision_type: Option<String>,
    pub decided_at: Option<NaiveDate>,
    pub issued_at: Option<NaiveDate>,
    pub location: Option<String>,
    pub legal_areas: Vec<String>,
    pub summary: Option<String>,
}

impl JudiciaryAdapter {
    pub fn new(config: &JudiciaryConfig, timeout: Duration) -> Result<Self> {
        let parse = |raw: &str| {
            Url::parse(raw)
                .map_err(|e| PolicyHarvestError::config(format!("invalid judiciary url '{raw}': {e}")))
        };
        Ok(Self {
            client: http::build_client()?,
            search_url: parse(&config.search_url)?,
            content_url: parse(&config.content_url)?,
            timeout,
        })
    }

    fn content_url_for(&self, ecli: &str) -> String {
        let mut url = self.content_url.clone();
        url.query_pairs_mut().append_pair("id", ecli);
        url.into()
    }
}

#[async_trait]
impl SourceAdapter for JudiciaryAdapter {
    type Extracted = Decision;

    fn source(&self) -> DocumentSource {
        DocumentSource::Judiciary
    }

    #[instrument(skip_all, fields(query = %seed.query))]
    async fn discover(&self, seed: &DiscoverySeed) -> Result<Vec<DiscoveryRecord>> {
        let mut url = self.search_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", &seed.query)
                .append_pair("max", &seed.max_results.max(1).to_string())
                .append_pair("return", "DOC");
            let range = &seed.params.date_range;
            if let Some(from) = range.from {
                pairs.append_pair("date", &from.to_string());
                if let Some(to) = range.to {
                    pairs.append_pair("date", &to.to_string());
                }
            }
        }

        let body = http::fetch_text(&self.client, url.as_str(), self.timeout).await?;
        let mut out = Vec::new();
        for entry in xml::records(&body, "entry")? {
            let Some(ecli) = entry.first("id").map(str::trim) else {
                continue;
            };
            let mut record = DiscoveryRecord::new(ecli, self.content_url_for(ecli));
            record.title_hint = entry.first("title").map(str::to_string);
            record.metadata = json!({
                "summary": entry.first("summary"),
                "updated": entry.first("updated"),
                "deeplink": entry.attr("link", "href", None),
            });
            out.push(record);
        }
        out.truncate(seed.max_results);
        debug!(count = out.len(), "decisions discovered");
        Ok(out)
    }

    async fn acquire(&self, record: &DiscoveryRecord) -> Result<ArtifactBundle> {
        http::fetch_artifact(&self.client, self.source(), record, &record.url, self.timeout).await
    }

    fn extract(&self, bundle: &ArtifactBundle) -> Result<Decision> {
        let raw = bundle.text();
        let doc = xml::document(&raw)?;
        let record = &bundle.record;

        let ecli = doc
            .first("identifier")
            .filter(|id| id.starts_with("ECLI:"))
            .unwrap_or(&record.source_id)
            .to_string();
        let text = xml::text_within(&raw, TEXT_CONTAINERS)?;
        if text.is_empty() {
            return Err(PolicyHarvestError::parse(format!("{ecli}: decision has no text")));
        }

        let court = doc.first("creator").map(str::to_string);
        let decided_at = doc.first("date").and_then(parse_date);
        let title = doc.first("title").map(str::to_string).unwrap_or_else(|| {
            [Some(ecli.as_str()), court.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ")
        });

        Ok(Decision {
            url: record
                .meta_str("deeplink")
                .unwrap_or(&bundle.url)
                .to_string(),
            title,
            text,
            court,
            decision_type: doc.first("type").map(str::to_string),
            decided_at,
            issued_at: doc.first("issued").and_then(parse_date),
            location: doc.first("spatial").map(str::to_string),
            legal_areas: doc
                .all("subject")
                .into_iter()
                .flat_map(|s| s.split(';'))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            summary: doc
                .first("inhoudsindicatie")
                .or_else(|| record.meta_str("summary"))
                .map(str::to_string),
            ecli,
        })
    }

    fn map(&self, d: &Decision) -> CanonicalDocumentDraft {
        let mut draft = CanonicalDocumentDraft::new(
            self.source(),
            d.ecli.clone(),
            d.url.clone(),
            d.title.clone(),
            d.text.clone(),
        );
        draft.publisher_authority = d.court.clone();
        draft.document_family = Some("case_law".into());
        draft.document_type = d.decision_type.clone();
        draft.dates.published_at = d.issued_at.or(d.decided_at);
        draft.source_metadata = json!({
            "jurisdiction": d.location,
            "decision_date": d.decided_at,
            "summary": d.summary,
        });
        draft
    }

    fn extensions(&self, d: &Decision) -> Vec<Extension> {
        let cited_eclis = citations::extract_eclis(&d.text)
            .into_iter()
            .filter(|e| e != &d.ecli)
            .collect();
        vec![Extension::Legal {
            ecli: Some(d.ecli.clone()),
            cited_eclis,
            article_references: citations::extract_article_references(&d.text),
            legal_areas: d.legal_areas.clone(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PipelineContext, run_pipeline};
    use policyharvest_shared::QueryParams;
    use policyharvest_storage::{DocumentStore, MemoryStore};

    const FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Zoekresultaten</title>
  <entry>
    <id>ECLI:NL:RBDHA:2024:101</id>
    <title type="text">ECLI:NL:RBDHA:2024:101, Rechtbank Den Haag, 05-01-2024, AWB 23/4567</title>
    <summary type="text">Omgevingsvergunning parkeergarage.</summary>
    <updated>2024-01-10T09:00:00Z</updated>
    <link rel="alternate" type="text/html" href="https://uitspraken.example/details?id=ECLI:NL:RBDHA:2024:101"/>
  </entry>
  <entry>
    <id>ECLI:NL:RBDHA:2024:102</id>
    <title type="text">ECLI:NL:RBDHA:2024:102, Rechtbank Den Haag, 06-01-2024</title>
  </entry>
</feed>"#;

    const CONTENT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<open-rechtspraak>
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:dcterms="http://purl.org/dc/terms/">
    <rdf:Description>
      <dcterms:identifier>ECLI:NL:RBDHA:2024:101</dcterms:identifier>
      <dcterms:creator>Rechtbank Den Haag</dcterms:creator>
      <dcterms:date>2024-01-05</dcterms:date>
      <dcterms:issued>2024-01-10</dcterms:issued>
      <dcterms:type>Uitspraak</dcterms:type>
      <dcterms:spatial>Den Haag</dcterms:spatial>
      <dcterms:subject>Bestuursrecht; Omgevingsrecht</dcterms:subject>
    </rdf:Description>
  </rdf:RDF>
  <inhoudsindicatie><para>Omgevingsvergunning voor een parkeergarage.</para></inhoudsindicatie>
  <uitspraak>
    <para>De rechtbank verwijst naar ECLI:NL:RVS:2023:55 en ECLI:NL:RBDHA:2024:101.</para>
    <para>Op grond van artikel 2.1 Wabo is een vergunning vereist.</para>
  </uitspraak>
</open-rechtspraak>"#;

    fn adapter(server: &wiremock::MockServer) -> JudiciaryAdapter {
        let config = JudiciaryConfig {
            enabled: true,
            search_url: format!("{}/uitspraken/zoeken", server.uri()),
            content_url: format!("{}/uitspraken/content", server.uri()),
        };
        JudiciaryAdapter::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn seed() -> DiscoverySeed {
        DiscoverySeed {
            query: "parkeergarage".into(),
            params: QueryParams {
                subject: "parkeergarage".into(),
                ..Default::default()
            },
            max_results: 10,
        }
    }

    #[tokio::test]
    async fn discover_reads_atom_entries() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/uitspraken/zoeken"))
            .and(wiremock::matchers::query_param("q", "parkeergarage"))
            .and(wiremock::matchers::query_param("return", "DOC"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let records = adapter(&server).discover(&seed()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_id, "ECLI:NL:RBDHA:2024:101");
        assert_eq!(
            records[0].url,
            format!(
                "{}/uitspraken/content?id=ECLI%3ANL%3ARBDHA%3A2024%3A101",
                server.uri()
            )
        );
        assert_eq!(
            records[0].meta_str("deeplink"),
            Some("https://uitspraken.example/details?id=ECLI:NL:RBDHA:2024:101")
        );
        assert_eq!(records[1].meta_str("deeplink"), None);
    }

    #[tokio::test]
    async fn decision_is_mapped_with_citations() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/uitspraken/zoeken"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/uitspraken/content"))
            .and(wiremock::matchers::query_param("id", "ECLI:NL:RBDHA:2024:101"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(CONTENT))
            .mount(&server)
            .await;

        let adapter = adapter(&server);
        let records = adapter.discover(&seed()).await.unwrap();
        let store = MemoryStore::new();
        let id = run_pipeline(&adapter, &records[0], &PipelineContext::default(), &store)
            .await
            .unwrap();

        let doc = store.find_by_id(&id).await.unwrap().unwrap();
        // No dcterms:title: built from identifier and court, then the feed
        // title (no separator) leaves it alone.
        assert_eq!(doc.title, "ECLI:NL:RBDHA:2024:101, Rechtbank Den Haag");
        assert_eq!(doc.publisher_authority.as_deref(), Some("Rechtbank Den Haag"));
        assert_eq!(doc.dates.published_at, NaiveDate::from_ymd_opt(2024, 1, 10));
        assert_eq!(doc.jurisdiction(), Some("Den Haag"));
        assert_eq!(
            doc.canonical_url,
            "https://uitspraken.example/details?id=ECLI:NL:RBDHA:2024:101"
        );
        assert!(doc.full_text.contains("artikel 2.1 Wabo"));
        assert!(!doc.full_text.contains("Omgevingsvergunning voor"));

        match &doc.extensions[..] {
            [Extension::Legal { ecli, cited_eclis, article_references, legal_areas }] => {
                assert_eq!(ecli.as_deref(), Some("ECLI:NL:RBDHA:2024:101"));
                assert_eq!(cited_eclis, &vec!["ECLI:NL:RVS:2023:55".to_string()]);
                assert_eq!(article_references, &vec!["artikel 2.1 Wabo".to_string()]);
                assert_eq!(legal_areas, &vec!["Bestuursrecht".to_string(), "Omgevingsrecht".to_string()]);
            }
            other => panic!("unexpected extensions: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_decision_fails_acquire() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = adapter(&server);
        let record = DiscoveryRecord::new("ECLI:NL:HR:2024:1", adapter.content_url_for("ECLI:NL:HR:2024:1"));
        let err = adapter.acquire(&record).await.unwrap_err();
        assert!(matches!(err, PolicyHarvestError::Network(_)));
    }
}
