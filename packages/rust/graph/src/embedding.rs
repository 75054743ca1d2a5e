//! Embedding providers and vector similarity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use policyharvest_shared::{EmbeddingSettings, PolicyHarvestError, Result};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::debug;

const USER_AGENT: &str = concat!("PolicyHarvest/", env!("CARGO_PKG_VERSION"));

/// Per-request limit for remote embedding calls.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Local, deterministic embedder: signed feature hashing of lowercase word
/// tokens, L2-normalized.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "feature-hashing"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dims: usize,
    timeout: Duration,
}

impl RemoteEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dims: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PolicyHarvestError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            dims,
            timeout: REMOTE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "model": self.model, "input": [text] });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PolicyHarvestError::ServiceUnavailable(format!("embedding request: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PolicyHarvestError::ServiceUnavailable(format!(
                "embedding endpoint returned {status}: {text}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PolicyHarvestError::parse(format!("embedding response: {e}")))?;
        let vector: Vec<f32> = json
            .pointer("/data/0/embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| PolicyHarvestError::parse("embedding response has no data[0].embedding"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if self.dims > 0 && vector.len() != self.dims {
            return Err(PolicyHarvestError::parse(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                self.dims
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(model = %self.model, chars = text.len(), "requesting embedding");
        tokio::time::timeout(self.timeout, self.request(text))
            .await
            .map_err(|_| {
                PolicyHarvestError::Timeout(format!(
                    "embedding request exceeded {:.1}s",
                    self.timeout.as_secs_f32()
                ))
            })?
    }
}

/// Build the configured provider.
pub fn provider_from_config(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(settings.dims))),
        "remote" => {
            let endpoint = settings.endpoint.clone().ok_or_else(|| {
                PolicyHarvestError::config("embedding.endpoint is required for the remote provider")
            })?;
            let model = settings
                .model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".into());
            let api_key = std::env::var(&settings.api_key_env).ok();
            Ok(Arc::new(RemoteEmbedder::new(endpoint, model, api_key, settings.dims)?))
        }
        other => Err(PolicyHarvestError::config(format!(
            "unknown embedding provider '{other}' (expected hashing or remote)"
        ))),
    }
}
