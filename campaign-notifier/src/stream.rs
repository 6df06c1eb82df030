use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_consumer::{assign_partitions, create_kafka_consumer, StartingOffsets};
use rdkafka::consumer::StreamConsumer;
use rdkafka::Message;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::error::StreamError;
use crate::metrics_consts::RECORDS_RECEIVED;
use crate::types::RawRecord;

/// Records read for one micro-batch, with the next offset to read for every
/// partition that contributed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawBatch {
    pub records: Vec<RawRecord>,
    pub end_offsets: BTreeMap<i32, i64>,
}

impl RawBatch {
    pub fn new(records: Vec<RawRecord>) -> Self {
        let mut end_offsets = BTreeMap::new();
        for record in &records {
            let next = end_offsets.entry(record.partition).or_insert(record.offset + 1);
            *next = (*next).max(record.offset + 1);
        }
        Self {
            records,
            end_offsets,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
pub trait RecordSource: Send {
    /// Reads up to one batch worth of records. An empty batch means nothing
    /// arrived before the batch timeout.
    async fn next_batch(&mut self) -> Result<RawBatch, StreamError>;
}

/// Reads the input topic through explicitly assigned partitions. Progress is
/// kept by the checkpoint, never committed to the broker.
pub struct KafkaRecordSource {
    consumer: StreamConsumer,
    start_offsets: BTreeMap<i32, i64>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl KafkaRecordSource {
    pub fn new(
        config: &KafkaConfig,
        group_id: &str,
        topic: &str,
        resume_from: &BTreeMap<i32, i64>,
        starting: StartingOffsets,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Result<Self, StreamError> {
        let consumer = create_kafka_consumer(config, group_id)?;
        let start_offsets = assign_partitions(
            &consumer,
            topic,
            resume_from,
            starting,
            Duration::from_secs(15),
        )?;
        info!(topic, ?start_offsets, batch_size, "reading input topic");

        Ok(Self {
            consumer,
            start_offsets,
            batch_size,
            batch_timeout,
        })
    }

    /// Offset each assigned partition started reading from.
    pub fn start_offsets(&self) -> &BTreeMap<i32, i64> {
        &self.start_offsets
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn next_batch(&mut self) -> Result<RawBatch, StreamError> {
        let mut records = Vec::with_capacity(self.batch_size);
        let deadline = Instant::now() + self.batch_timeout;

        while records.len() < self.batch_size {
            match timeout_at(deadline, self.consumer.recv()).await {
                Ok(Ok(message)) => records.push(RawRecord {
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message.key().map(<[u8]>::to_vec),
                    payload: message.payload().map(<[u8]>::to_vec),
                }),
                Ok(Err(e)) => {
                    warn!(error = %e, "kafka recv error");
                    break;
                }
                // batch timeout, return what we have
                Err(_) => break,
            }
        }

        metrics::counter!(RECORDS_RECEIVED).increment(records.len() as u64);
        Ok(RawBatch::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use common_kafka::kafka_producer::KafkaContext;
    use common_kafka::test::create_mock_kafka;
    use common_kafka::test::mock_kafka_config;
    use rdkafka::producer::{FutureProducer, FutureRecord};

    #[test]
    fn end_offsets_are_next_to_read() {
        let batch = RawBatch::new(vec![
            RawRecord::new(0, 5, "a"),
            RawRecord::new(1, 9, "b"),
            RawRecord::new(0, 7, "c"),
            RawRecord::new(0, 6, "d"),
        ]);

        assert_eq!(batch.len(), 4);
        assert_eq!(batch.end_offsets, BTreeMap::from([(0, 8), (1, 10)]));
        assert!(RawBatch::new(vec![]).end_offsets.is_empty());
    }

    #[tokio::test]
    async fn reads_batches_from_assigned_partitions() {
        let topic = "campaign_events";
        let (cluster, producer) = create_mock_kafka().await;
        cluster.create_topic(topic, 1, 1).expect("failed to create topic");

        for i in 0..5 {
            let payload = format!("{{\"restaurant_id\": \"R{i}\"}}");
            let record: FutureRecord<'_, (), String> = FutureRecord::to(topic).payload(&payload);
            producer
                .send(record, Duration::from_secs(5))
                .await
                .expect("failed to produce");
        }

        let mut source = KafkaRecordSource::new(
            &mock_kafka_config(cluster.bootstrap_servers()),
            "campaign-notifier",
            topic,
            &BTreeMap::from([(0, 2)]),
            StartingOffsets::Earliest,
            2,
            Duration::from_secs(5),
        )
        .expect("failed to create source");

        let first = source.next_batch().await.unwrap();
        let offsets: Vec<_> = first.records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![2, 3]);
        assert_eq!(first.end_offsets, BTreeMap::from([(0, 4)]));

        let second = source.next_batch().await.unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(
            second.records[0].payload.as_deref(),
            Some(&b"{\"restaurant_id\": \"R4\"}"[..])
        );
    }

    async fn produce(producer: &FutureProducer<KafkaContext>, topic: &str, partition: i32) {
        let record: FutureRecord<'_, (), str> = FutureRecord::to(topic)
            .partition(partition)
            .payload("{\"restaurant_id\": \"R1\"}");
        producer
            .send(record, Duration::from_secs(5))
            .await
            .expect("failed to produce");
    }

    #[tokio::test]
    async fn quiet_partition_resumes_from_its_start_offset() {
        let topic = "two_partitions";
        let (cluster, producer) = create_mock_kafka().await;
        cluster.create_topic(topic, 2, 1).expect("failed to create topic");
        let config = mock_kafka_config(cluster.bootstrap_servers());

        produce(&producer, topic, 0).await;
        produce(&producer, topic, 0).await;

        let mut first = KafkaRecordSource::new(
            &config,
            "campaign-notifier",
            topic,
            &BTreeMap::new(),
            StartingOffsets::Latest,
            1,
            Duration::from_secs(5),
        )
        .expect("failed to create source");
        assert_eq!(first.start_offsets(), &BTreeMap::from([(0, 2), (1, 0)]));

        let checkpoint = Checkpoint::initial(topic)
            .with_start_offsets(first.start_offsets())
            .expect("fresh checkpoint has no partitions");

        produce(&producer, topic, 0).await;
        let batch = first.next_batch().await.unwrap();
        assert_eq!(batch.end_offsets, BTreeMap::from([(0, 3)]));
        let checkpoint = checkpoint.advance(&batch.end_offsets);
        assert_eq!(checkpoint.offsets, BTreeMap::from([(0, 3), (1, 0)]));
        drop(first);

        // written while nothing was reading
        produce(&producer, topic, 1).await;

        let mut restarted = KafkaRecordSource::new(
            &config,
            "campaign-notifier",
            topic,
            &checkpoint.offsets,
            StartingOffsets::Latest,
            1,
            Duration::from_secs(5),
        )
        .expect("failed to create source");
        assert_eq!(restarted.start_offsets(), &checkpoint.offsets);

        let batch = restarted.next_batch().await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].partition, 1);
        assert_eq!(batch.records[0].offset, 0);
    }

    #[tokio::test]
    async fn empty_topic_times_out_with_empty_batch() {
        let topic = "quiet_topic";
        let (cluster, _producer) = create_mock_kafka().await;
        cluster.create_topic(topic, 2, 1).expect("failed to create topic");

        let mut source = KafkaRecordSource::new(
            &mock_kafka_config(cluster.bootstrap_servers()),
            "campaign-notifier",
            topic,
            &BTreeMap::new(),
            StartingOffsets::Latest,
            10,
            Duration::from_millis(200),
        )
        .expect("failed to create source");

        let batch = source.next_batch().await.unwrap();
        assert!(batch.is_empty());
        assert!(batch.end_offsets.is_empty());
    }
}
