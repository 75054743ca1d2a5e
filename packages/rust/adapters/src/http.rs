//! HTTP fetching shared by the source adapters.
//!
//! Every fetch races against a timer; losing the race yields
//! [`PolicyHarvestError::Timeout`] for that request only.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use policyharvest_shared::{DocumentSource, PolicyHarvestError, Result};
use reqwest::Client;
use tracing::debug;

use crate::{ArtifactBundle, DiscoveryRecord};

/// User-Agent string for adapter requests.
pub(crate) const USER_AGENT: &str = concat!("PolicyHarvest/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we accept (25 MB).
const MAX_RESPONSE_SIZE: u64 = 25 * 1024 * 1024;

/// Response headers worth keeping on the artifact ref.
const KEPT_HEADERS: &[&str] = &["content-type", "etag", "last-modified", "content-language"];

/// Build a reqwest client with the adapter defaults.
pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| PolicyHarvestError::Network(format!("failed to build HTTP client: {e}")))
}

pub(crate) struct Fetched {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub bytes: Vec<u8>,
}

/// GET `url`, failing on non-success status, oversized bodies or timeout.
pub(crate) async fn fetch(client: &Client, url: &str, timeout: Duration) -> Result<Fetched> {
    fetch_capped(client, url, timeout, MAX_RESPONSE_SIZE).await
}

fn too_large(url: &str, len: u64, max: u64) -> PolicyHarvestError {
    PolicyHarvestError::Network(format!("{url}: response too large ({len} bytes, max {max})"))
}

async fn fetch_capped(
    client: &Client,
    url: &str,
    timeout: Duration,
    max_size: u64,
) -> Result<Fetched> {
    debug!(%url, "fetching");
    let request = async {
        let mut response = client
            .get(url)
            .send()
            .await
            .map_err(|e| PolicyHarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PolicyHarvestError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > max_size {
                return Err(too_large(url, len, max_size));
            }
        }

        let final_url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter(|(name, _)| KEPT_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| "application/octet-stream".into());

        // Content-Length is absent on chunked bodies, so the cap is enforced while reading.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PolicyHarvestError::Network(format!("{url}: body read failed: {e}")))?
        {
            let read = (bytes.len() + chunk.len()) as u64;
            if read > max_size {
                return Err(too_large(url, read, max_size));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(Fetched {
            url: final_url,
            status: status.as_u16(),
            content_type,
            headers,
            bytes,
        })
    };

    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(PolicyHarvestError::Timeout(format!(
            "{url}: no response within {}s",
            timeout.as_secs_f32()
        ))),
    }
}

/// Fetch a text document (search feeds, indexes).
pub(crate) async fn fetch_text(client: &Client, url: &str, timeout: Duration) -> Result<String> {
    let fetched = fetch(client, url, timeout).await?;
    Ok(String::from_utf8_lossy(&fetched.bytes).into_owned())
}

/// Fetch `url` on behalf of `record` and wrap it as an [`ArtifactBundle`].
pub(crate) async fn fetch_artifact(
    client: &Client,
    source: DocumentSource,
    record: &DiscoveryRecord,
    url: &str,
    timeout: Duration,
) -> Result<ArtifactBundle> {
    let fetched = fetch(client, url, timeout).await?;
    Ok(ArtifactBundle {
        record: record.clone(),
        source,
        url: fetched.url,
        bytes: fetched.bytes,
        content_type: fetched.content_type,
        headers: fetched.headers,
        http_status: fetched.status,
        fetched_at: Utc::now(),
    })
}
