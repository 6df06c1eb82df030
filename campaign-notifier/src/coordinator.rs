use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{PipelineError, SinkError};
use crate::metrics_consts::{
    BATCHES_COMMITTED, BATCH_ATTEMPT, CHECKPOINT_BATCH_ID, SINK_WRITE_ERRORS, SINK_WRITE_TIME,
};
use crate::retry::RetryPolicy;
use crate::sink::{DurableSink, OutboundSink};
use crate::types::NotificationRecord;

/// Delivers each micro-batch to both sinks and only then commits the
/// checkpoint. A retry resends the whole batch to both sinks, so a record can
/// reach a sink more than once but a committed batch always reached both.
pub struct BatchSinkCoordinator {
    durable: Arc<dyn DurableSink>,
    outbound: Arc<dyn OutboundSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    retry_policy: RetryPolicy,
}

impl BatchSinkCoordinator {
    pub fn new(
        durable: Arc<dyn DurableSink>,
        outbound: Arc<dyn OutboundSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            durable,
            outbound,
            checkpoints,
            retry_policy,
        }
    }

    /// Writes `batch` to both sinks, retrying per the policy, then commits
    /// `checkpoint`. Returns an error when the run must stop.
    pub async fn deliver(
        &self,
        batch: Arc<[NotificationRecord]>,
        checkpoint: &Checkpoint,
    ) -> Result<(), PipelineError> {
        let batch_id = checkpoint.batch_id;

        if batch.is_empty() {
            info!(batch_id, "no notifications in batch, advancing checkpoint");
        } else {
            self.write_with_retries(&batch, batch_id).await?;
        }

        self.checkpoints
            .commit(checkpoint)
            .await
            .map_err(|source| {
                error!(batch_id, "failed to commit checkpoint: {}", source);
                PipelineError::Checkpoint { batch_id, source }
            })?;

        metrics::counter!(BATCHES_COMMITTED).increment(1);
        metrics::gauge!(CHECKPOINT_BATCH_ID).set(batch_id as f64);
        Ok(())
    }

    async fn write_with_retries(
        &self,
        batch: &[NotificationRecord],
        batch_id: u64,
    ) -> Result<(), PipelineError> {
        let mut attempt = 1;
        loop {
            let error = match self.write_once(batch).await {
                Ok(()) => {
                    metrics::counter!(BATCH_ATTEMPT, &[("result", "success")]).increment(1);
                    info!(batch_id, records = batch.len(), attempt, "batch delivered");
                    return Ok(());
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                metrics::counter!(BATCH_ATTEMPT, &[("result", "failed")]).increment(1);
                error!(batch_id, attempt, "non-retryable sink error: {}", error);
                return Err(PipelineError::NonRetryable {
                    batch_id,
                    source: error,
                });
            }

            if !self.retry_policy.should_retry(attempt) {
                metrics::counter!(BATCH_ATTEMPT, &[("result", "failed")]).increment(1);
                error!(batch_id, attempt, "sink retries exhausted: {}", error);
                return Err(PipelineError::RetriesExhausted {
                    batch_id,
                    attempts: attempt,
                    source: error,
                });
            }

            metrics::counter!(BATCH_ATTEMPT, &[("result", "retry")]).increment(1);
            let delay = self.retry_policy.time_until_next_retry(attempt);
            warn!(
                batch_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "batch delivery failed, retrying: {}",
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One attempt: both writes run concurrently on the same batch. If both
    /// fail, the durable error is reported.
    async fn write_once(&self, batch: &[NotificationRecord]) -> Result<(), SinkError> {
        let (durable, outbound) = tokio::join!(
            timed("postgres", self.durable.append(batch)),
            timed("kafka", self.outbound.publish(batch)),
        );
        durable.and(outbound)
    }
}

async fn timed(
    sink: &'static str,
    write: impl std::future::Future<Output = Result<(), SinkError>>,
) -> Result<(), SinkError> {
    let start = Instant::now();
    let result = write.await;
    metrics::histogram!(SINK_WRITE_TIME, &[("sink", sink)])
        .record(start.elapsed().as_millis() as f64);
    if let Err(e) = &result {
        metrics::counter!(SINK_WRITE_ERRORS, &[("sink", sink)]).increment(1);
        warn!(sink, "sink write failed: {}", e);
    }
    result
}
