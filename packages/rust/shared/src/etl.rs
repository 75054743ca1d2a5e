//! Cross-runtime ETL contracts.
//!
//! The ingestion side hands documents to an external RDF/ETL runtime through
//! three JSON payloads: the job request (`etl-job@v1`), the job result
//! (`etl-result@v1`) and the run manifest. Field names are camelCase on the
//! wire. Every payload is checked structurally by serde and then by
//! [`EtlJobRequest::validate`]-style rules that collect all violations.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::types::is_sha256_hex;

pub const ETL_JOB_SCHEMA_VERSION: &str = "etl-job@v1";
pub const ETL_RESULT_SCHEMA_VERSION: &str = "etl-result@v1";

/// Validation failure for an ETL payload.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EtlContractError {
    pub message: String,
    /// Individual rule violations; empty for malformed JSON.
    pub errors: Vec<ContractViolation>,
    /// `schemaVersion` of the rejected payload, when it could be read.
    pub schema_version: Option<String>,
}

/// One violated rule, addressed by a dotted wire path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractViolation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Default)]
struct Violations(Vec<ContractViolation>);

impl Violations {
    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.0.push(ContractViolation {
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn non_empty(&mut self, path: &str, value: &str) {
        if value.is_empty() {
            self.push(path, "must not be empty");
        }
    }

    fn timestamp(&mut self, path: &str, value: &str) {
        if DateTime::parse_from_rfc3339(value).is_err() {
            self.push(path, format!("invalid ISO 8601 datetime: {value}"));
        }
    }

    fn sha256(&mut self, path: &str, value: &str) {
        if !is_sha256_hex(value) {
            self.push(path, format!("not a sha256 hex digest: {value}"));
        }
    }
}

// ---------------------------------------------------------------------------
// etl-job@v1
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoSource {
    Mongo,
    Postgis,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Turtle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtensionFlags {
    pub geo: bool,
    pub legal: bool,
    pub web: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Map<String, serde_json::Value>>,
    pub include_chunks: bool,
    pub include_extensions: ExtensionFlags,
    pub geo_source: GeoSource,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobArtifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobModels {
    pub nlp_model_id: String,
    pub rdf_mapping_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobOutput {
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_store_prefix: Option<String>,
    pub manifest_name: String,
}

/// Request for one ETL run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobRequest {
    pub schema_version: String,
    pub run_id: String,
    pub created_at: String,
    pub input: EtlJobInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<EtlJobArtifacts>,
    pub models: EtlJobModels,
    pub output: EtlJobOutput,
}

impl EtlJobRequest {
    fn violations(&self) -> Vec<ContractViolation> {
        let mut v = Violations::default();
        if self.schema_version != ETL_JOB_SCHEMA_VERSION {
            v.push(
                "schemaVersion",
                format!("expected '{ETL_JOB_SCHEMA_VERSION}', got '{}'", self.schema_version),
            );
        }
        v.non_empty("runId", &self.run_id);
        v.timestamp("createdAt", &self.created_at);

        let has_ids = self.input.document_ids.as_ref().is_some_and(|ids| !ids.is_empty());
        let has_query = self.input.query.as_ref().is_some_and(|q| !q.is_empty());
        if has_ids == has_query {
            v.push(
                "input",
                "either documentIds or query must be provided, but not both",
            );
        }

        if let Some(refs) = self.artifacts.as_ref().and_then(|a| a.artifact_refs.as_ref()) {
            for (i, r) in refs.iter().enumerate() {
                v.sha256(&format!("artifacts.artifactRefs[{i}]"), r);
            }
        }

        v.non_empty("models.nlpModelId", &self.models.nlp_model_id);
        v.non_empty("models.rdfMappingVersion", &self.models.rdf_mapping_version);

        let out = &self.output;
        if out.output_dir.is_some() == out.artifact_store_prefix.is_some() {
            v.push(
                "output",
                "either outputDir or artifactStorePrefix must be provided, but not both",
            );
        }
        if let Some(dir) = &out.output_dir {
            v.non_empty("output.outputDir", dir);
        }
        if let Some(prefix) = &out.artifact_store_prefix {
            v.non_empty("output.artifactStorePrefix", prefix);
        }
        v.non_empty("output.manifestName", &out.manifest_name);
        v.0
    }
}

// ---------------------------------------------------------------------------
// etl-result@v1
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtlJobStatus {
    Succeeded,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobStats {
    pub documents_processed: u64,
    pub triples_emitted: u64,
    pub files_written: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobOutputs {
    pub turtle_files: Vec<String>,
    pub manifest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Outcome reported back by the ETL runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlJobResult {
    pub schema_version: String,
    pub run_id: String,
    pub status: EtlJobStatus,
    pub stats: EtlJobStats,
    pub outputs: EtlJobOutputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<EtlJobError>>,
}

impl EtlJobResult {
    fn violations(&self) -> Vec<ContractViolation> {
        let mut v = Violations::default();
        if self.schema_version != ETL_RESULT_SCHEMA_VERSION {
            v.push(
                "schemaVersion",
                format!(
                    "expected '{ETL_RESULT_SCHEMA_VERSION}', got '{}'",
                    self.schema_version
                ),
            );
        }
        v.non_empty("runId", &self.run_id);
        if self.outputs.turtle_files.is_empty() {
            v.push("outputs.turtleFiles", "must list at least one file");
        }
        v.non_empty("outputs.manifest", &self.outputs.manifest);
        for (i, err) in self.errors.iter().flatten().enumerate() {
            v.non_empty(&format!("errors[{i}].code"), &err.code);
            v.non_empty(&format!("errors[{i}].message"), &err.message);
        }
        v.0
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub content_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestProvenance {
    pub input_fingerprints: Vec<DocumentFingerprint>,
    pub parser_versions: BTreeMap<String, String>,
    pub mapper_versions: BTreeMap<String, String>,
    pub model_versions: BTreeMap<String, String>,
    pub rdf_mapping_version: String,
}

/// Provenance record written next to the ETL output files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlManifest {
    pub schema_version: String,
    pub run_id: String,
    pub created_at: String,
    pub completed_at: String,
    pub provenance: ManifestProvenance,
    pub outputs: serde_json::Map<String, serde_json::Value>,
    pub stats: EtlJobStats,
}

impl EtlManifest {
    fn violations(&self) -> Vec<ContractViolation> {
        let mut v = Violations::default();
        v.non_empty("schemaVersion", &self.schema_version);
        v.non_empty("runId", &self.run_id);
        v.timestamp("createdAt", &self.created_at);
        v.timestamp("completedAt", &self.completed_at);
        for (i, fp) in self.provenance.input_fingerprints.iter().enumerate() {
            v.non_empty(
                &format!("provenance.inputFingerprints[{i}].documentId"),
                &fp.document_id,
            );
            v.sha256(
                &format!("provenance.inputFingerprints[{i}].contentFingerprint"),
                &fp.content_fingerprint,
            );
        }
        v.non_empty(
            "provenance.rdfMappingVersion",
            &self.provenance.rdf_mapping_version,
        );
        v.0
    }
}

// ---------------------------------------------------------------------------
// Validation entry points
// ---------------------------------------------------------------------------

fn validate_value<T>(
    value: serde_json::Value,
    label: &str,
    rules: impl FnOnce(&T) -> Vec<ContractViolation>,
) -> Result<T, EtlContractError>
where
    T: serde::de::DeserializeOwned,
{
    let schema_version = value
        .get("schemaVersion")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let parsed: T = serde_json::from_value(value).map_err(|e| EtlContractError {
        message: format!("{label} validation failed: {e}"),
        errors: vec![ContractViolation {
            path: String::new(),
            message: e.to_string(),
        }],
        schema_version: schema_version.clone(),
    })?;

    let errors = rules(&parsed);
    if errors.is_empty() {
        return Ok(parsed);
    }
    let summary = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(EtlContractError {
        message: format!("{label} validation failed: {summary}"),
        errors,
        schema_version,
    })
}

fn parse_json(json: &str) -> Result<serde_json::Value, EtlContractError> {
    serde_json::from_str(json).map_err(|e| EtlContractError {
        message: format!("invalid JSON: {e}"),
        errors: Vec::new(),
        schema_version: None,
    })
}

fn read_file(path: &Path, label: &str) -> Result<serde_json::Value, EtlContractError> {
    let content = std::fs::read_to_string(path).map_err(|e| EtlContractError {
        message: format!("{label} file not readable: {}: {e}", path.display()),
        errors: Vec::new(),
        schema_version: None,
    })?;
    parse_json(&content)
}

pub fn validate_etl_job_request(value: serde_json::Value) -> Result<EtlJobRequest, EtlContractError> {
    validate_value(value, "ETL job request", EtlJobRequest::violations)
}

pub fn validate_etl_job_result(value: serde_json::Value) -> Result<EtlJobResult, EtlContractError> {
    validate_value(value, "ETL job result", EtlJobResult::violations)
}

pub fn validate_etl_manifest(value: serde_json::Value) -> Result<EtlManifest, EtlContractError> {
    validate_value(value, "ETL manifest", EtlManifest::violations)
}

pub fn load_etl_job_request_from_json(json: &str) -> Result<EtlJobRequest, EtlContractError> {
    validate_etl_job_request(parse_json(json)?)
}

pub fn load_etl_job_result_from_json(json: &str) -> Result<EtlJobResult, EtlContractError> {
    validate_etl_job_result(parse_json(json)?)
}

pub fn load_etl_manifest_from_json(json: &str) -> Result<EtlManifest, EtlContractError> {
    validate_etl_manifest(parse_json(json)?)
}

pub fn load_etl_job_request(path: &Path) -> Result<EtlJobRequest, EtlContractError> {
    validate_etl_job_request(read_file(path, "ETL job request")?)
}

pub fn load_etl_job_result(path: &Path) -> Result<EtlJobResult, EtlContractError> {
    validate_etl_job_result(read_file(path, "ETL job result")?)
}

pub fn load_etl_manifest(path: &Path) -> Result<EtlManifest, EtlContractError> {
    validate_etl_manifest(read_file(path, "ETL manifest")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn digest() -> String {
        "ab".repeat(32)
    }

    fn job_request() -> serde_json::Value {
        json!({
            "schemaVersion": "etl-job@v1",
            "runId": "run-1",
            "createdAt": "2026-03-01T10:00:00Z",
            "input": {
                "documentIds": ["doc-1", "doc-2"],
                "includeChunks": false,
                "includeExtensions": { "geo": false, "legal": true, "web": true },
                "geoSource": "mongo"
            },
            "artifacts": { "artifactRefs": [digest()] },
            "models": { "nlpModelId": "nl_core_news_md", "rdfMappingVersion": "v1" },
            "output": { "format": "turtle", "outputDir": "/tmp/out", "manifestName": "manifest.json" }
        })
    }

    #[test]
    fn valid_job_request_parses() {
        let req = validate_etl_job_request(job_request()).expect("valid request");
        assert_eq!(req.run_id, "run-1");
        assert_eq!(req.input.geo_source, GeoSource::Mongo);
        assert_eq!(req.output.format, OutputFormat::Turtle);
    }

    #[test]
    fn job_request_roundtrips_camel_case() {
        let req = validate_etl_job_request(job_request()).expect("valid");
        let value = serde_json::to_value(&req).expect("serialize");
        assert!(value["input"].get("documentIds").is_some());
        assert!(value["output"].get("artifactStorePrefix").is_none());
    }

    #[test]
    fn ids_and_query_together_are_rejected() {
        let mut value = job_request();
        value["input"]["query"] = json!({ "subject": "parkeren" });
        let err = validate_etl_job_request(value).unwrap_err();
        assert_eq!(err.schema_version.as_deref(), Some("etl-job@v1"));
        assert!(err.errors.iter().any(|e| e.path == "input"));
    }

    #[test]
    fn neither_ids_nor_query_is_rejected() {
        let mut value = job_request();
        value["input"]["documentIds"] = json!([]);
        assert!(validate_etl_job_request(value).is_err());
    }

    #[test]
    fn bad_artifact_ref_and_output_are_all_reported() {
        let mut value = job_request();
        value["artifacts"]["artifactRefs"] = json!(["not-a-digest"]);
        value["output"]["artifactStorePrefix"] = json!("s3://bucket/etl");
        let err = validate_etl_job_request(value).unwrap_err();
        let paths: Vec<&str> = err.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"artifacts.artifactRefs[0]"));
        assert!(paths.contains(&"output"));
    }

    #[test]
    fn wrong_schema_version_and_timestamp() {
        let mut value = job_request();
        value["schemaVersion"] = json!("etl-job@v2");
        value["createdAt"] = json!("yesterday");
        let err = validate_etl_job_request(value).unwrap_err();
        assert_eq!(err.errors.len(), 2);
        assert_eq!(err.schema_version.as_deref(), Some("etl-job@v2"));
    }

    #[test]
    fn unknown_geo_source_fails_structurally() {
        let mut value = job_request();
        value["input"]["geoSource"] = json!("elastic");
        let err = validate_etl_job_request(value).unwrap_err();
        assert!(err.message.contains("ETL job request"));
    }

    #[test]
    fn malformed_json_has_no_violations() {
        let err = load_etl_job_request_from_json("{ not json").unwrap_err();
        assert!(err.errors.is_empty());
        assert!(err.schema_version.is_none());
        assert!(err.message.starts_with("invalid JSON"));
    }

    #[test]
    fn job_result_requires_turtle_files() {
        let value = json!({
            "schemaVersion": "etl-result@v1",
            "runId": "run-1",
            "status": "partial",
            "stats": { "documentsProcessed": 2, "triplesEmitted": 40, "filesWritten": 0 },
            "outputs": { "turtleFiles": [], "manifest": "manifest.json" }
        });
        let err = validate_etl_job_result(value).unwrap_err();
        assert!(err.errors.iter().any(|e| e.path == "outputs.turtleFiles"));
    }

    #[test]
    fn job_result_rejects_unknown_status() {
        let value = json!({
            "schemaVersion": "etl-result@v1",
            "runId": "run-1",
            "status": "done",
            "stats": { "documentsProcessed": 0, "triplesEmitted": 0, "filesWritten": 0 },
            "outputs": { "turtleFiles": ["a.ttl"], "manifest": "m.json" }
        });
        assert!(validate_etl_job_result(value).is_err());
    }

    #[test]
    fn manifest_checks_fingerprints() {
        let value = json!({
            "schemaVersion": "etl-manifest@v1",
            "runId": "run-1",
            "createdAt": "2026-03-01T10:00:00Z",
            "completedAt": "2026-03-01T10:05:00+01:00",
            "provenance": {
                "inputFingerprints": [
                    { "documentId": "doc-1", "contentFingerprint": digest() },
                    { "documentId": "doc-2", "contentFingerprint": "xyz" }
                ],
                "parserVersions": {},
                "mapperVersions": {},
                "modelVersions": { "nlp": "3.7" },
                "rdfMappingVersion": "v1"
            },
            "outputs": { "turtleFiles": ["a.ttl"], "manifest": "m.json" },
            "stats": { "documentsProcessed": 2, "triplesEmitted": 10, "filesWritten": 1 }
        });
        let err = validate_etl_manifest(value).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert!(err.errors[0].path.contains("inputFingerprints[1]"));
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("ph_etl_{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&path, job_request().to_string()).expect("write");
        let req = load_etl_job_request(&path).expect("load");
        assert_eq!(req.models.rdf_mapping_version, "v1");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_etl_manifest(Path::new("/nonexistent/manifest.json")).unwrap_err();
        assert!(err.message.contains("not readable"));
    }
}
