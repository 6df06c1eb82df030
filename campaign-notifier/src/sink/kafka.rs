use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_producer::{send_iter_to_kafka, KafkaContext};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use tracing::{error, info};

use crate::error::SinkError;
use crate::sink::OutboundSink;
use crate::types::{FeedbackRow, NotificationRecord};

pub struct KafkaOutboundSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaOutboundSink {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }

    /// Waits for in-flight messages to be delivered, used on shutdown.
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        info!(topic = %self.topic, "flushing outbound producer");
        self.producer.flush(timeout)
    }
}

#[async_trait]
impl OutboundSink for KafkaOutboundSink {
    async fn publish(&self, records: &[NotificationRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let results = send_iter_to_kafka(
            &self.producer,
            &self.topic,
            records.iter().map(FeedbackRow::from),
        )
        .await;

        let total = results.len();
        let mut failed = 0;
        let mut first = None;
        for result in results {
            if let Err(e) = result {
                failed += 1;
                first.get_or_insert(e);
            }
        }

        match first {
            None => Ok(()),
            Some(first) => {
                error!(
                    topic = %self.topic,
                    failed, total, "failed to publish notifications: {}", first
                );
                Err(SinkError::Publish {
                    failed,
                    total,
                    first,
                })
            }
        }
    }
}
