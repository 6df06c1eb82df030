use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::CheckpointError;

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Read progress on the input topic. Only written once both sinks accepted
/// the batch it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub topic: String,
    /// Id of the last committed batch, 0 before the first commit.
    pub batch_id: u64,
    /// Next offset to read, per partition.
    pub offsets: BTreeMap<i32, i64>,
    pub committed_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn initial(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            batch_id: 0,
            offsets: BTreeMap::new(),
            committed_at: Utc::now(),
        }
    }

    /// Adds the start position of partitions this checkpoint has never seen,
    /// so a partition that stays quiet still resumes where reading began.
    /// Returns None when every partition is already tracked.
    pub fn with_start_offsets(&self, start_offsets: &BTreeMap<i32, i64>) -> Option<Self> {
        let missing: Vec<_> = start_offsets
            .iter()
            .filter(|(partition, _)| !self.offsets.contains_key(partition))
            .collect();
        if missing.is_empty() {
            return None;
        }

        let mut seeded = self.clone();
        for (partition, offset) in missing {
            seeded.offsets.insert(*partition, *offset);
        }
        seeded.committed_at = Utc::now();
        Some(seeded)
    }

    /// The checkpoint that follows this one once a batch ending at
    /// `end_offsets` is delivered. Partitions not in the batch keep their
    /// position, and positions never move backwards.
    pub fn advance(&self, end_offsets: &BTreeMap<i32, i64>) -> Self {
        let mut offsets = self.offsets.clone();
        for (partition, next) in end_offsets {
            offsets
                .entry(*partition)
                .and_modify(|current| *current = (*current).max(*next))
                .or_insert(*next);
        }

        Self {
            topic: self.topic.clone(),
            batch_id: self.batch_id + 1,
            offsets,
            committed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored checkpoint for `topic`, or an initial one if
    /// nothing was committed yet.
    async fn load(&self, topic: &str) -> Result<Checkpoint, CheckpointError>;

    /// Durably replaces the stored checkpoint.
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

/// Keeps the checkpoint as a json file, replaced atomically on commit.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_FILE}.tmp"))
    }
}

async fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, topic: &str) -> Result<Checkpoint, CheckpointError> {
        let path = self.path();
        let Some(checkpoint) = read_checkpoint(&path).await? else {
            info!(?path, "no checkpoint found, starting fresh");
            return Ok(Checkpoint::initial(topic));
        };

        if checkpoint.topic != topic {
            return Err(CheckpointError::TopicMismatch {
                expected: topic.to_string(),
                found: checkpoint.topic,
            });
        }

        info!(
            ?path,
            batch_id = checkpoint.batch_id,
            partitions = checkpoint.offsets.len(),
            "loaded checkpoint"
        );
        Ok(checkpoint)
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, self.path()).await?;
        // the rename is only durable once the directory entry is flushed
        tokio::fs::File::open(&self.dir).await?.sync_all().await?;
        debug!(batch_id = checkpoint.batch_id, "committed checkpoint");
        Ok(())
    }
}
