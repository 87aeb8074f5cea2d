use super::retry::{RetryError, RetryPolicy};
use super::sink::{Sink, SinkError};
use crate::collector::batch::LogBatch;
use crate::storage::traits::{BufferStore, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Delivery failed and the batch could not be buffered either.
    #[error("failed to buffer batch {batch_id}: {source}")]
    Buffer {
        batch_id: uuid::Uuid,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Retries ran out; the batch now sits in the buffer store
    Buffered,
    /// Shutdown interrupted delivery; the batch was neither sent nor buffered
    Cancelled,
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub buffered: usize,
    pub failed: usize,
    /// Batches not attempted (or interrupted) because of cancellation, in order
    pub unsent: Vec<LogBatch>,
}

/// Sends batches to the sink with retry, falling back to the buffer store.
pub struct DeliveryEngine {
    sink: Arc<dyn Sink>,
    buffer: Arc<dyn BufferStore>,
    policy: RetryPolicy,
}

impl DeliveryEngine {
    pub fn new(sink: Arc<dyn Sink>, buffer: Arc<dyn BufferStore>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            buffer,
            policy,
        }
    }

    pub fn buffer(&self) -> &Arc<dyn BufferStore> {
        &self.buffer
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send one batch, retrying per policy. Never touches the buffer store.
    pub async fn send_with_retry(
        &self,
        batch: &LogBatch,
        cancel: &CancellationToken,
    ) -> Result<(), RetryError<SinkError>> {
        self.policy
            .run(cancel, |attempt| {
                tracing::debug!(batch_id = %batch.batch_id, attempt = attempt, "Sending batch");
                self.sink.send(batch)
            })
            .await
    }

    pub async fn deliver(
        &self,
        batch: &LogBatch,
        cancel: &CancellationToken,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        match self.send_with_retry(batch, cancel).await {
            Ok(()) => {
                tracing::info!(
                    batch_id = %batch.batch_id,
                    entries = batch.len(),
                    size = batch.size,
                    "Batch delivered"
                );
                Ok(DeliveryOutcome::Delivered)
            }
            Err(RetryError::Cancelled) => {
                tracing::info!(batch_id = %batch.batch_id, "Delivery cancelled");
                Ok(DeliveryOutcome::Cancelled)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!(
                    batch_id = %batch.batch_id,
                    attempts = attempts,
                    error = %last,
                    "Delivery failed, buffering batch"
                );
                self.buffer
                    .save(batch)
                    .await
                    .map_err(|source| DeliveryError::Buffer {
                        batch_id: batch.batch_id,
                        source,
                    })?;
                Ok(DeliveryOutcome::Buffered)
            }
        }
    }

    /// Deliver each batch independently, in order.
    ///
    /// A failure on one batch does not stop the rest. Once cancellation is
    /// observed, the current and all remaining batches are returned unsent.
    pub async fn deliver_all(
        &self,
        batches: Vec<LogBatch>,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut pending = batches.into_iter();

        while let Some(batch) = pending.next() {
            match self.deliver(&batch, cancel).await {
                Ok(DeliveryOutcome::Delivered) => report.delivered += 1,
                Ok(DeliveryOutcome::Buffered) => report.buffered += 1,
                Ok(DeliveryOutcome::Cancelled) => {
                    report.unsent.push(batch);
                    report.unsent.extend(pending);
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Batch lost: delivery and buffering both failed");
                    report.failed += 1;
                }
            }
        }

        report
    }
}
