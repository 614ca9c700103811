//! `BatchRunner`: runs one closure per batch item on a bounded pool of Tokio
//! tasks and folds every result into a [`BatchTracker`].
//!
//! Guarantees:
//! - every item is attempted exactly once
//! - the report is built only after every task has finished or been cut off
//! - errors and panics inside a task become a failure for that item only
//! - items still running at the deadline (minus a safety margin) are aborted
//!   and reported as failed so the source redelivers them

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::Instant;

use crate::error::RecordError;
use crate::tracker::{BatchTracker, PartialFailureReport};

/// Batch runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Upper bound on concurrently running items. `None` sizes the pool to
    /// the batch; `Some(1)` processes items one at a time.
    pub max_concurrency: Option<usize>,
    /// Time reserved before the invocation deadline for building the report.
    pub deadline_margin_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            deadline_margin_ms: 500,
        }
    }
}

impl RunnerConfig {
    pub fn sequential() -> Self {
        Self {
            max_concurrency: Some(1),
            ..Default::default()
        }
    }
}

/// Per-invocation context handed over by the invoking runtime.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: String,
    /// Hard deadline of the invocation, if the runtime imposes one.
    pub deadline: Option<Instant>,
}

impl InvocationContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// One entry of a batch: the identifier reported on failure plus the payload
/// handed to the per-item closure.
#[derive(Debug, Clone)]
pub struct BatchItem<T> {
    pub identifier: String,
    pub payload: T,
}

impl<T> BatchItem<T> {
    pub fn new(identifier: impl Into<String>, payload: T) -> Self {
        Self {
            identifier: identifier.into(),
            payload,
        }
    }
}

/// Drives a batch to completion. Holds no state between batches.
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    config: RunnerConfig,
}

impl BatchRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `per_item` over every item and return the partial-failure report.
    pub async fn run<T, F, Fut>(
        &self,
        items: Vec<BatchItem<T>>,
        ctx: &InvocationContext,
        per_item: F,
    ) -> PartialFailureReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RecordError>> + Send + 'static,
    {
        let total = items.len();
        let tracker = BatchTracker::new(items.iter().map(|i| i.identifier.clone()).collect());
        if total == 0 {
            return tracker.report();
        }

        let permits = self.config.max_concurrency.unwrap_or(total).clamp(1, total);
        let semaphore = Arc::new(Semaphore::new(permits));
        let per_item = Arc::new(per_item);
        let cutoff = ctx.deadline.map(|d| {
            d.checked_sub(Duration::from_millis(self.config.deadline_margin_ms))
                .unwrap_or(d)
        });

        tracing::debug!(
            request_id = %ctx.request_id,
            total,
            permits,
            "starting batch"
        );

        let mut handles = Vec::with_capacity(total);
        for item in items {
            let semaphore = semaphore.clone();
            let per_item = per_item.clone();
            let identifier = item.identifier;
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| RecordError::handler("worker pool closed"))?;
                per_item(item.payload).await
            });
            handles.push((identifier, handle));
        }

        for (index, (identifier, mut handle)) in handles.into_iter().enumerate() {
            let joined = match cutoff {
                Some(at) => match tokio::time::timeout_at(at, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        tracing::warn!(id = %identifier, "deadline reached, abandoning record");
                        tracker.record_failure(index, RecordError::DeadlineExceeded.to_string());
                        continue;
                    }
                },
                None => handle.await,
            };

            match joined {
                Ok(Ok(())) => tracker.record_success(index),
                Ok(Err(e)) => {
                    tracing::warn!(id = %identifier, error = %e, "record failed");
                    tracker.record_failure(index, e.to_string());
                }
                Err(join_err) => {
                    let err = RecordError::Panicked {
                        message: panic_message(join_err),
                    };
                    tracing::error!(id = %identifier, error = %err, "record task aborted");
                    tracker.record_failure(index, err.to_string());
                }
            }
        }

        let report = tracker.report();
        tracing::info!(
            request_id = %ctx.request_id,
            total,
            failed = report.batch_item_failures.len(),
            "batch complete"
        );
        report
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task cancelled".into();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
