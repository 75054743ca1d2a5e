//! Bounded-concurrency batch executor.
//!
//! At most `concurrency` record tasks are in flight; each completion
//! immediately admits the next queued record. Outcomes are captured per
//! record, so one failure or panic never affects its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use policyharvest_adapters::DiscoveryRecord;
use policyharvest_shared::{AppConfig, PolicyHarvestError, Result};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum tasks in flight.
    pub concurrency: usize,
    /// Log counters every N completions.
    pub progress_every: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            progress_every: 10,
        }
    }
}

impl From<&AppConfig> for ExecutorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.pipeline.concurrency,
            progress_every: config.pipeline.progress_every,
        }
    }
}

/// Anything the executor can label in logs and outcomes.
pub trait BatchItem: Send + 'static {
    fn key(&self) -> String;
}

impl BatchItem for DiscoveryRecord {
    fn key(&self) -> String {
        self.source_id.clone()
    }
}

impl BatchItem for String {
    fn key(&self) -> String {
        self.clone()
    }
}

/// Running counters, reported to [`BatchProgress`] and the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounters {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Receives counters as records complete.
pub trait BatchProgress: Send + Sync {
    fn on_progress(&self, counters: &BatchCounters);
}

#[derive(Debug)]
pub struct RecordOutcome<R> {
    pub key: String,
    pub result: Result<R>,
}

/// Per-record outcomes in completion order plus the final counters.
#[derive(Debug)]
pub struct BatchOutcome<R> {
    pub outcomes: Vec<RecordOutcome<R>>,
    pub counters: BatchCounters,
    pub elapsed: Duration,
}

impl<R> BatchOutcome<R> {
    pub fn successes(&self) -> impl Iterator<Item = (&str, &R)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|r| (o.key.as_str(), r)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &PolicyHarvestError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.key.as_str(), e)))
    }
}

pub struct BatchExecutor {
    config: ExecutorConfig,
    progress: Option<Arc<dyn BatchProgress>>,
}

impl BatchExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn BatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `handler` over every item with at most `concurrency` in flight.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, mut handler: F) -> BatchOutcome<R>
    where
        T: BatchItem,
        R: Send + 'static,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let start = Instant::now();
        let limit = self.config.concurrency.max(1);
        let every = self.config.progress_every.max(1);
        let mut counters = BatchCounters {
            total: items.len(),
            ..Default::default()
        };
        let mut outcomes = Vec::with_capacity(items.len());
        let mut queue = items.into_iter();
        let mut in_flight: JoinSet<RecordOutcome<R>> = JoinSet::new();

        let mut admit = |set: &mut JoinSet<RecordOutcome<R>>, item: T| {
            let key = item.key();
            let task = tokio::spawn(handler(item));
            set.spawn(async move {
                let result = match task.await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(PolicyHarvestError::record(&key, e.to_string())),
                    Err(join) => {
                        error!(record = %key, error = %join, "record task panicked");
                        Err(PolicyHarvestError::record(&key, format!("task failed: {join}")))
                    }
                };
                RecordOutcome { key, result }
            });
        };

        for item in queue.by_ref().take(limit) {
            admit(&mut in_flight, item);
        }

        while let Some(joined) = in_flight.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                // The wrapper only awaits the record task; losing it means the
                // runtime is shutting down.
                Err(join) => RecordOutcome {
                    key: String::from("<unknown>"),
                    result: Err(PolicyHarvestError::record("<unknown>", join.to_string())),
                },
            };

            counters.completed += 1;
            if outcome.result.is_ok() {
                counters.succeeded += 1;
            } else {
                counters.failed += 1;
            }
            outcomes.push(outcome);

            if let Some(item) = queue.next() {
                admit(&mut in_flight, item);
            }

            if counters.completed % every == 0 && counters.completed < counters.total {
                self.report(&counters, false);
            }
        }

        self.report(&counters, true);
        BatchOutcome {
            outcomes,
            counters,
            elapsed: start.elapsed(),
        }
    }

    fn report(&self, counters: &BatchCounters, done: bool) {
        info!(
            completed = counters.completed,
            total = counters.total,
            succeeded = counters.succeeded,
            failed = counters.failed,
            done,
            "batch progress"
        );
        if let Some(progress) = &self.progress {
            progress.on_progress(counters);
        }
    }
}
