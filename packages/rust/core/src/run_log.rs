//! Run logging for workflow steps.

use async_trait::async_trait;
use policyharvest_shared::Result;
use policyharvest_storage::Storage;
use serde_json::Value;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[async_trait]
pub trait RunLogger: Send + Sync {
    async fn log(&self, run_id: &str, message: &str, level: LogLevel, meta: Option<&Value>)
    -> Result<()>;
}

/// Emits run-log lines as tracing events.
pub struct TracingRunLogger;

#[async_trait]
impl RunLogger for TracingRunLogger {
    async fn log(
        &self,
        run_id: &str,
        message: &str,
        level: LogLevel,
        meta: Option<&Value>,
    ) -> Result<()> {
        let meta = meta.map(Value::to_string).unwrap_or_default();
        match level {
            LogLevel::Debug => debug!(run_id, meta = %meta, "{message}"),
            LogLevel::Info => info!(run_id, meta = %meta, "{message}"),
            LogLevel::Warn => warn!(run_id, meta = %meta, "{message}"),
            LogLevel::Error => error!(run_id, meta = %meta, "{message}"),
        }
        Ok(())
    }
}

#[async_trait]
impl RunLogger for Storage {
    async fn log(
        &self,
        run_id: &str,
        message: &str,
        level: LogLevel,
        meta: Option<&Value>,
    ) -> Result<()> {
        self.append_run_log(run_id, level.as_str(), message, meta).await
    }
}

/// Log through `logger`, downgrading a logger failure to a warning.
pub async fn log_quietly(
    logger: &dyn RunLogger,
    run_id: &str,
    message: &str,
    level: LogLevel,
    meta: Option<&Value>,
) {
    if let Err(e) = logger.log(run_id, message, level, meta).await {
        warn!(run_id, error = %e, "run logger failed; continuing");
    }
}
