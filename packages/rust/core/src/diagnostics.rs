//! Structured diagnostics for a source that degraded to an empty result.

use policyharvest_shared::{DocumentSource, FailureKind, PolicyHarvestError, QueryParams};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureDiagnostics {
    pub source: DocumentSource,
    pub kind: FailureKind,
    pub is_network: bool,
    pub is_timeout: bool,
    pub is_service: bool,
    pub message: String,
    pub query: QueryParams,
    pub guidance: String,
}

impl FailureDiagnostics {
    pub fn from_error(source: DocumentSource, err: &PolicyHarvestError, query: &QueryParams) -> Self {
        let kind = FailureKind::classify(err);
        Self {
            source,
            kind,
            is_network: kind == FailureKind::Network,
            is_timeout: kind == FailureKind::Timeout,
            is_service: kind == FailureKind::Service,
            message: err.to_string(),
            query: query.clone(),
            guidance: kind.guidance().to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
