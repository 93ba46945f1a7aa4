//! Durable queue of failed deliveries, replayed with bounded backoff.
//!
//! An entry is retried at most [`MAX_ATTEMPTS`] times. After the n-th failed
//! attempt it waits `BACKOFF_MINUTES[n - 1]` (last value reused) before it is
//! due again. The queue assumes a single worker: entries are not leased, so
//! two concurrent `process_batch` calls could replay the same entry.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::errors::AppError;
use crate::models::{RetryStatus, WebhookRetryEntry};
use crate::storage::RetryStorage;

pub const MAX_ATTEMPTS: i32 = 3;
pub const BACKOFF_MINUTES: [i64; 3] = [1, 5, 30];

/// Replays one queued payload. `Err` counts as a failed attempt.
#[async_trait]
pub trait RetryProcessor: Send + Sync {
    async fn process(&self, service: &str, payload: &Value) -> Result<(), AppError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    /// Entries that reached `failed` during this batch.
    pub exhausted: usize,
}

/// Wait required after `attempts` failed attempts.
pub fn backoff_after(attempts: i32) -> ChronoDuration {
    let idx = usize::try_from(attempts.saturating_sub(1))
        .unwrap_or(0)
        .min(BACKOFF_MINUTES.len() - 1);
    ChronoDuration::minutes(BACKOFF_MINUTES[idx])
}

/// Fresh entries are always due; retried ones only once their backoff elapsed.
pub fn is_due(entry: &WebhookRetryEntry, now: DateTime<Utc>) -> bool {
    entry.attempts == 0 || now >= entry.updated_at + backoff_after(entry.attempts)
}

/// Apply a failed attempt to `entry`.
pub fn record_failure(entry: &mut WebhookRetryEntry, error: &str, now: DateTime<Utc>) {
    entry.attempts += 1;
    entry.last_error = Some(error.to_string());
    entry.updated_at = now;
    entry.status = if entry.attempts >= MAX_ATTEMPTS {
        RetryStatus::Failed
    } else {
        RetryStatus::Retrying
    };
}

fn preview(error: &str) -> &str {
    match error.char_indices().nth(100) {
        Some((idx, _)) => &error[..idx],
        None => error,
    }
}

pub struct RetryQueue {
    storage: Arc<dyn RetryStorage>,
    batch_limit: i64,
}

impl RetryQueue {
    pub fn new(storage: Arc<dyn RetryStorage>, batch_limit: i64) -> Self {
        Self {
            storage,
            batch_limit,
        }
    }

    pub async fn enqueue(
        &self,
        service: &str,
        payload: &Value,
        error: &str,
    ) -> Result<WebhookRetryEntry, AppError> {
        let entry = self.storage.insert_retry(service, payload, error).await?;
        tracing::info!(
            "Saved failed delivery to retry queue: service={}, id={}, error={}",
            service,
            entry.id,
            preview(error)
        );
        Ok(entry)
    }

    pub async fn process_batch(
        &self,
        processor: &dyn RetryProcessor,
    ) -> Result<BatchReport, AppError> {
        self.process_batch_at(Utc::now(), processor).await
    }

    /// `process_batch` with an explicit clock.
    pub async fn process_batch_at(
        &self,
        now: DateTime<Utc>,
        processor: &dyn RetryProcessor,
    ) -> Result<BatchReport, AppError> {
        let candidates = self
            .storage
            .retry_candidates(MAX_ATTEMPTS, self.batch_limit)
            .await?;
        let total = candidates.len();
        let due: Vec<WebhookRetryEntry> = candidates
            .into_iter()
            .filter(|entry| is_due(entry, now))
            .collect();

        if total > 0 {
            tracing::info!("Found {} queued deliveries, {} ready for retry", total, due.len());
        }

        let mut report = BatchReport::default();
        for mut entry in due {
            report.processed += 1;
            match processor.process(&entry.service, &entry.payload).await {
                Ok(()) => {
                    entry.status = RetryStatus::Success;
                    entry.updated_at = now;
                    self.storage.save_retry(&entry).await?;
                    tracing::info!("Retry successful: id={}, service={}", entry.id, entry.service);
                    report.success += 1;
                }
                Err(e) => {
                    let error = e.to_string();
                    record_failure(&mut entry, &error, now);
                    self.storage.save_retry(&entry).await?;
                    report.failed += 1;

                    if entry.status == RetryStatus::Failed {
                        report.exhausted += 1;
                        tracing::error!(
                            "Retry exhausted (max attempts): id={}, service={}, error={}",
                            entry.id,
                            entry.service,
                            preview(&error)
                        );
                    } else {
                        tracing::warn!(
                            "Retry failed (attempt {}/{}), next in {} min: id={}, error={}",
                            entry.attempts,
                            MAX_ATTEMPTS,
                            backoff_after(entry.attempts).num_minutes(),
                            entry.id,
                            preview(&error)
                        );
                    }
                }
            }
        }

        if report.processed > 0 {
            tracing::info!(
                "Retry batch complete: {} success, {} failed, {} total",
                report.success,
                report.failed,
                report.processed
            );
        }
        Ok(report)
    }
}

/// Run `process_batch` every `every` until the task is aborted.
pub fn spawn_worker(
    queue: Arc<RetryQueue>,
    processor: Arc<dyn RetryProcessor>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Retry worker started (every {:?})", every);

        loop {
            ticker.tick().await;
            if let Err(e) = queue.process_batch(processor.as_ref()).await {
                tracing::error!("Retry batch aborted: {}", e);
            }
        }
    })
}
