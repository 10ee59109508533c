use crate::adapters::storage::{ObjectStorage, StorageError};
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use time::{Duration, OffsetDateTime};
use tracing::Instrument;

#[derive(Clone, Debug)]
struct Metrics {
    deleted: Counter<u64>,
    errors: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mail-gateway");
        Self {
            deleted: meter
                .u64_counter("attachments_deleted_total")
                .with_description("Total number of expired attachments deleted from storage")
                .build(),
            errors: meter
                .u64_counter("attachments_cleanup_errors_total")
                .with_description("Total number of errors encountered during attachment cleanup")
                .build(),
        }
    }
}

/// Deletes staged attachments once they outlive the retention window.
#[derive(Debug)]
pub struct AttachmentCleanupWorker {
    storage: Arc<dyn ObjectStorage>,
    interval: StdDuration,
    retention: Duration,
    metrics: Metrics,
}

impl AttachmentCleanupWorker {
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>, interval: StdDuration, retention: Duration) -> Self {
        Self { storage, interval, retention, metrics: Metrics::new() }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut next_tick = tokio::time::Instant::now() + self.interval;

        while !*shutdown.borrow() {
            tokio::select! {
                () = tokio::time::sleep_until(next_tick) => {
                    async {
                        tracing::debug!("Running attachment cleanup...");

                        match self.sweep(OffsetDateTime::now_utc()).await {
                            Ok(count) => {
                                if count > 0 {
                                    self.metrics.deleted.add(count, &[]);
                                }
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Attachment cleanup cycle failed");
                                self.metrics.errors.add(1, &[]);
                            }
                        }
                    }
                    .instrument(tracing::info_span!("attachment_cleanup_iteration"))
                    .await;
                    next_tick = tokio::time::Instant::now() + self.interval;
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Attachment cleanup loop shutting down...");
    }

    /// Deletes every object last modified before `now - retention`.
    /// Individual delete failures are logged and skipped.
    ///
    /// # Errors
    /// Returns a `StorageError` if the object listing fails.
    #[tracing::instrument(err, skip(self), fields(expired_count = tracing::field::Empty))]
    pub async fn sweep(&self, now: OffsetDateTime) -> Result<u64, StorageError> {
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return Ok(0);
        };
        let expired = self.storage.list_older_than(cutoff).await?;
        tracing::Span::current().record("expired_count", expired.len());

        if expired.is_empty() {
            return Ok(0);
        }
        tracing::info!(count = %expired.len(), "Found expired attachments to delete");

        let mut deleted = 0;
        for key in expired {
            match self.storage.delete(&key).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Failed to delete expired attachment");
                    self.metrics.errors.add(1, &[]);
                }
            }
        }

        tracing::info!(deleted_count = %deleted, "Attachment cleanup completed");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::MemoryStorage;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let storage = Arc::new(MemoryStorage::new());
        let now = OffsetDateTime::now_utc();
        storage.put_at("old", Bytes::from_static(b"1"), "text/plain", now - Duration::hours(25)).await;
        storage.put_at("fresh", Bytes::from_static(b"2"), "text/plain", now - Duration::hours(1)).await;

        let worker = AttachmentCleanupWorker::new(storage.clone(), StdDuration::from_secs(60), Duration::hours(24));
        assert_eq!(worker.sweep(now).await.unwrap(), 1);
        assert_eq!(storage.keys().await, vec!["fresh".to_string()]);

        assert_eq!(worker.sweep(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = AttachmentCleanupWorker::new(storage, StdDuration::from_secs(3600), Duration::hours(1));
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(worker.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(StdDuration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
