use async_trait::async_trait;

use crate::error::SinkError;
use crate::types::NotificationRecord;

pub mod kafka;
pub mod postgres;

/// The relational store every notification is appended to.
#[async_trait]
pub trait DurableSink: Send + Sync {
    /// Appends the whole batch, or nothing. The `feedback` column is left null.
    async fn append(&self, records: &[NotificationRecord]) -> Result<(), SinkError>;
}

/// The topic downstream notification services read from.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Publishes one unkeyed message per record. Succeeds only once every
    /// message was acknowledged.
    async fn publish(&self, records: &[NotificationRecord]) -> Result<(), SinkError>;
}
