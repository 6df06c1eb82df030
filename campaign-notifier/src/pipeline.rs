use std::sync::Arc;
use std::time::Instant;

use health::HealthHandle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::clock::SnapshotClock;
use crate::coordinator::BatchSinkCoordinator;
use crate::decoder::decode_batch;
use crate::error::PipelineError;
use crate::join::join_with_subscribers;
use crate::metrics_consts::{BATCH_PROCESS_TIME, BATCH_SIZE};
use crate::reference::ReferenceData;
use crate::stream::{RawBatch, RecordSource};
use crate::types::NotificationRecord;
use crate::window::filter_active;

/// What happened to one read from the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing arrived before the batch timeout, the checkpoint did not move.
    Idle,
    /// The batch was delivered and committed under this id.
    Committed { batch_id: u64, notifications: usize },
}

pub struct Pipeline<S> {
    source: S,
    reference: Arc<ReferenceData>,
    coordinator: BatchSinkCoordinator,
    clock: SnapshotClock,
    checkpoint: Checkpoint,
    liveness: HealthHandle,
}

impl<S: RecordSource> Pipeline<S> {
    pub fn new(
        source: S,
        reference: Arc<ReferenceData>,
        coordinator: BatchSinkCoordinator,
        clock: SnapshotClock,
        checkpoint: Checkpoint,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            source,
            reference,
            coordinator,
            clock,
            checkpoint,
            liveness,
        }
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Runs batches until `shutdown` flips to true or a fatal error occurs.
    /// A read in progress when the signal arrives is dropped, a delivery in
    /// progress is completed first.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        info!(
            topic = %self.checkpoint.topic,
            batch_id = self.checkpoint.batch_id,
            now = self.clock.current(),
            "starting pipeline"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.liveness.report_healthy();

            let batch = tokio::select! {
                _ = shutdown.changed() => break,
                batch = self.source.next_batch() => batch?,
            };
            self.process(batch).await?;
        }

        info!(
            batch_id = self.checkpoint.batch_id,
            "shutdown signal received, pipeline stopped"
        );
        Ok(())
    }

    /// Reads and processes one batch.
    pub async fn run_once(&mut self) -> Result<BatchOutcome, PipelineError> {
        let batch = self.source.next_batch().await?;
        self.process(batch).await
    }

    async fn process(&mut self, batch: RawBatch) -> Result<BatchOutcome, PipelineError> {
        if batch.is_empty() {
            debug!("no records before batch timeout");
            return Ok(BatchOutcome::Idle);
        }

        let start = Instant::now();
        metrics::histogram!(BATCH_SIZE).record(batch.len() as f64);

        // filter and join of one batch see the same now and the same reference set
        let now = self.clock.for_next_batch();
        let reference = self.reference.snapshot();

        let decoded = decode_batch(&batch.records);
        let active = filter_active(decoded.events, now);
        let notifications: Arc<[NotificationRecord]> =
            join_with_subscribers(&active, &reference, now).into();

        let next = self.checkpoint.advance(&batch.end_offsets);
        self.coordinator
            .deliver(notifications.clone(), &next)
            .await?;

        info!(
            batch_id = next.batch_id,
            records = batch.len(),
            decode_errors = decoded.errors,
            active = active.len(),
            notifications = notifications.len(),
            "batch committed"
        );
        metrics::histogram!(BATCH_PROCESS_TIME).record(start.elapsed().as_millis() as f64);

        let outcome = BatchOutcome::Committed {
            batch_id: next.batch_id,
            notifications: notifications.len(),
        };
        self.checkpoint = next;
        self.liveness.report_healthy();
        Ok(outcome)
    }
}
