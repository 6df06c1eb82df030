//! In-memory sinks, sources and stores for exercising the pipeline without
//! Kafka or Postgres.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{CheckpointError, ReferenceLoadError, SinkError, StreamError};
use crate::reference::ReferenceSource;
use crate::sink::{DurableSink, OutboundSink};
use crate::stream::{RawBatch, RecordSource};
use crate::types::{NotificationRecord, RawRecord, SubscriberRestaurantLink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

type ErrorFactory<E> = Box<dyn FnOnce() -> E + Send>;

/// Queue of errors the next calls will return, one per call.
struct Failures<E>(Mutex<VecDeque<ErrorFactory<E>>>);

impl<E> Default for Failures<E> {
    fn default() -> Self {
        Self(Mutex::new(VecDeque::new()))
    }
}

impl<E> Failures<E> {
    fn push(&self, factory: ErrorFactory<E>) {
        lock(&self.0).push_back(factory);
    }

    fn take(&self) -> Option<E> {
        lock(&self.0).pop_front().map(|factory| factory())
    }
}

fn injected_sink_error() -> SinkError {
    SinkError::Unavailable("injected failure".to_string())
}

/// Records every successfully appended record, in call order.
#[derive(Default)]
pub struct MemoryDurableSink {
    records: Mutex<Vec<NotificationRecord>>,
    calls: AtomicUsize,
    failures: Failures<SinkError>,
}

impl MemoryDurableSink {
    /// The next `n` appends fail with a retryable error.
    pub fn fail_next(&self, n: usize) {
        for _ in 0..n {
            self.failures.push(Box::new(injected_sink_error));
        }
    }

    pub fn fail_next_with(&self, error: impl FnOnce() -> SinkError + Send + 'static) {
        self.failures.push(Box::new(error));
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        lock(&self.records).clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableSink for MemoryDurableSink {
    async fn append(&self, records: &[NotificationRecord]) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.take() {
            return Err(error);
        }
        lock(&self.records).extend_from_slice(records);
        Ok(())
    }
}

/// Records every successfully published record, in call order.
#[derive(Default)]
pub struct MemoryOutboundSink {
    records: Mutex<Vec<NotificationRecord>>,
    calls: AtomicUsize,
    failures: Failures<SinkError>,
}

impl MemoryOutboundSink {
    /// The next `n` publishes fail with a retryable error.
    pub fn fail_next(&self, n: usize) {
        for _ in 0..n {
            self.failures.push(Box::new(injected_sink_error));
        }
    }

    pub fn fail_next_with(&self, error: impl FnOnce() -> SinkError + Send + 'static) {
        self.failures.push(Box::new(error));
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        lock(&self.records).clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundSink for MemoryOutboundSink {
    async fn publish(&self, records: &[NotificationRecord]) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.take() {
            return Err(error);
        }
        lock(&self.records).extend_from_slice(records);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    stored: Mutex<Option<Checkpoint>>,
    commits: Mutex<Vec<Checkpoint>>,
    failures: Failures<CheckpointError>,
}

impl MemoryCheckpointStore {
    /// The next `n` commits fail with an io error.
    pub fn fail_next(&self, n: usize) {
        for _ in 0..n {
            self.failures.push(Box::new(|| {
                CheckpointError::Io(std::io::Error::other("injected failure"))
            }));
        }
    }

    pub fn commits(&self) -> Vec<Checkpoint> {
        lock(&self.commits).clone()
    }

    pub fn committed_offsets(&self) -> Vec<BTreeMap<i32, i64>> {
        lock(&self.commits)
            .iter()
            .map(|c| c.offsets.clone())
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, topic: &str) -> Result<Checkpoint, CheckpointError> {
        match lock(&self.stored).clone() {
            Some(checkpoint) if checkpoint.topic != topic => Err(CheckpointError::TopicMismatch {
                expected: topic.to_string(),
                found: checkpoint.topic,
            }),
            Some(checkpoint) => Ok(checkpoint),
            None => Ok(Checkpoint::initial(topic)),
        }
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(error) = self.failures.take() {
            return Err(error);
        }
        *lock(&self.stored) = Some(checkpoint.clone());
        lock(&self.commits).push(checkpoint.clone());
        Ok(())
    }
}

/// Serves a fixed set of links, optionally failing every fetch.
#[derive(Default)]
pub struct StaticReferenceSource {
    links: Mutex<Vec<SubscriberRestaurantLink>>,
    failing: AtomicBool,
}

impl StaticReferenceSource {
    pub fn new(links: Vec<SubscriberRestaurantLink>) -> Self {
        Self {
            links: Mutex::new(links),
            failing: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let source = Self::default();
        source.set_failing(true);
        source
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_links(&self, links: Vec<SubscriberRestaurantLink>) {
        *lock(&self.links) = links;
    }
}

#[async_trait]
impl ReferenceSource for StaticReferenceSource {
    async fn fetch_links(&self) -> Result<Vec<SubscriberRestaurantLink>, ReferenceLoadError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReferenceLoadError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(lock(&self.links).clone())
    }
}

/// Hands out pre-built batches, then empty ones after a short pause like an
/// idle topic would.
#[derive(Default)]
pub struct VecRecordSource {
    batches: VecDeque<Vec<RawRecord>>,
}

impl VecRecordSource {
    pub fn new(batches: impl IntoIterator<Item = Vec<RawRecord>>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RecordSource for VecRecordSource {
    async fn next_batch(&mut self) -> Result<RawBatch, StreamError> {
        match self.batches.pop_front() {
            Some(records) => Ok(RawBatch::new(records)),
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(RawBatch::default())
            }
        }
    }
}
