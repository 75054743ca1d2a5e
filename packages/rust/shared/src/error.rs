//! Error types for PolicyHarvest.
//!
//! Library crates use [`PolicyHarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The variants double as the pipeline's failure taxonomy: only
//! [`PolicyHarvestError::Validation`] is allowed to fail an ingestion step,
//! everything else is classified with [`FailureKind::classify`] and degraded.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all PolicyHarvest operations.
#[derive(Debug, thiserror::Error)]
pub enum PolicyHarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed input: step parameters or a draft that violates the schema.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Source unreachable, connection reset, non-success HTTP status.
    #[error("network error: {0}")]
    Network(String),

    /// A fetch or external call exceeded its time budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A required dependency (term source, embedder, store) is missing or down.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A single record failed somewhere in its adapter pipeline.
    #[error("record {record} failed: {message}")]
    RecordProcessing { record: String, message: String },

    /// Navigation or knowledge graph write failure.
    #[error("graph write error: {0}")]
    GraphWrite(String),

    /// XML/HTML/JSON parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PolicyHarvestError>;

impl PolicyHarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a failure that happened while processing one record.
    pub fn record(record: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RecordProcessing {
            record: record.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is allowed to propagate out of an ingestion step.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Coarse failure class reported in step diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Timeout,
    Validation,
    Service,
    Unknown,
}

impl FailureKind {
    /// Classify an error into the diagnostics taxonomy.
    pub fn classify(err: &PolicyHarvestError) -> Self {
        match err {
            PolicyHarvestError::Network(_) => Self::Network,
            PolicyHarvestError::Timeout(_) => Self::Timeout,
            PolicyHarvestError::Validation { .. } => Self::Validation,
            PolicyHarvestError::ServiceUnavailable(_)
            | PolicyHarvestError::Storage(_)
            | PolicyHarvestError::GraphWrite(_) => Self::Service,
            PolicyHarvestError::RecordProcessing { message, .. } => {
                let lower = message.to_lowercase();
                if lower.contains("timeout") || lower.contains("timed out") {
                    Self::Timeout
                } else if lower.contains("network") || lower.contains("connect") {
                    Self::Network
                } else {
                    Self::Unknown
                }
            }
            _ => Self::Unknown,
        }
    }

    /// Stable label used in logs and serialized diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Service => "service",
            Self::Unknown => "unknown",
        }
    }

    /// Operator guidance attached to logged diagnostics.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::Network => {
                "The source could not be reached. Check connectivity and the configured base URL; the workflow continues without this source."
            }
            Self::Timeout => {
                "The source responded too slowly. Retry later or raise the fetch timeout; the workflow continues without this source."
            }
            Self::Validation => "The step parameters are invalid. Fix the input and rerun the step.",
            Self::Service => {
                "A required service (store, term source, embedder) is unavailable. Check its configuration and health."
            }
            Self::Unknown => {
                "An unexpected error occurred. Inspect the run log for details; the workflow continues without this source."
            }
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PolicyHarvestError::config("missing base url");
        assert_eq!(err.to_string(), "config error: missing base url");

        let err = PolicyHarvestError::record("ECLI:NL:HR:2020:1", "acquire failed");
        assert_eq!(err.to_string(), "record ECLI:NL:HR:2020:1 failed: acquire failed");
    }

    #[test]
    fn classify_taxonomy() {
        assert_eq!(
            FailureKind::classify(&PolicyHarvestError::Network("refused".into())),
            FailureKind::Network
        );
        assert_eq!(
            FailureKind::classify(&PolicyHarvestError::Timeout("10s".into())),
            FailureKind::Timeout
        );
        assert_eq!(
            FailureKind::classify(&PolicyHarvestError::validation("empty subject")),
            FailureKind::Validation
        );
        assert_eq!(
            FailureKind::classify(&PolicyHarvestError::ServiceUnavailable("embedder".into())),
            FailureKind::Service
        );
        assert_eq!(
            FailureKind::classify(&PolicyHarvestError::parse("bad xml")),
            FailureKind::Unknown
        );
    }

    #[test]
    fn only_validation_propagates() {
        assert!(PolicyHarvestError::validation("x").is_validation());
        assert!(!PolicyHarvestError::Network("x".into()).is_validation());
    }
}
