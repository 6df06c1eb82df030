use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{Offset, TopicPartitionList};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{KafkaConfig, KafkaConfigError};

/// Where to start reading a partition that has no recorded position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartingOffsets {
    Earliest,
    Latest,
}

impl FromStr for StartingOffsets {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "earliest" => Ok(StartingOffsets::Earliest),
            "latest" => Ok(StartingOffsets::Latest),
            _ => Err(format!(
                "unknown starting offsets: {s}, must be earliest or latest"
            )),
        }
    }
}

#[derive(Error, Debug)]
pub enum CreateConsumerError {
    #[error("invalid kafka configuration: {0}")]
    Config(#[from] KafkaConfigError),
    #[error("failed to create kafka consumer: {0}")]
    Kafka(#[from] KafkaError),
}

/// Creates a consumer whose progress is tracked by the caller: offsets are
/// neither stored nor committed to the broker.
pub fn create_kafka_consumer(
    config: &KafkaConfig,
    group_id: &str,
) -> Result<StreamConsumer, CreateConsumerError> {
    let mut client_config = config.client_config()?;
    client_config
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false");

    debug!("rdkafka consumer configuration: {:?}", client_config);
    Ok(client_config.create()?)
}

/// Assigns every partition of `topic` to the consumer. Partitions present in
/// `resume_from` continue from the recorded next offset, the others start
/// at the low or high watermark picked by `starting`. Returns the concrete
/// start offset of every assigned partition.
pub fn assign_partitions(
    consumer: &StreamConsumer,
    topic: &str,
    resume_from: &BTreeMap<i32, i64>,
    starting: StartingOffsets,
    timeout: Duration,
) -> Result<BTreeMap<i32, i64>, KafkaError> {
    let metadata = consumer.fetch_metadata(Some(topic), timeout)?;
    let partitions: Vec<i32> = metadata
        .topics()
        .iter()
        .filter(|t| t.name() == topic)
        .flat_map(|t| t.partitions().iter().map(|p| p.id()))
        .collect();

    if partitions.is_empty() {
        return Err(KafkaError::MetadataFetch(
            RDKafkaErrorCode::UnknownTopicOrPartition,
        ));
    }

    let mut start_offsets = BTreeMap::new();
    let mut assignment = TopicPartitionList::new();
    for partition in partitions {
        let offset = match resume_from.get(&partition) {
            Some(next) => *next,
            None => {
                let (low, high) = consumer.fetch_watermarks(topic, partition, timeout)?;
                match starting {
                    StartingOffsets::Earliest => low,
                    StartingOffsets::Latest => high,
                }
            }
        };
        assignment.add_partition_offset(topic, partition, Offset::Offset(offset))?;
        start_offsets.insert(partition, offset);
    }
    consumer.assign(&assignment)?;

    info!(
        topic,
        partitions = start_offsets.len(),
        resumed = resume_from.len(),
        "assigned input partitions"
    );
    Ok(start_offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_starting_offsets() {
        assert_eq!("earliest".parse(), Ok(StartingOffsets::Earliest));
        assert_eq!(" Latest ".parse(), Ok(StartingOffsets::Latest));
        assert!("newest".parse::<StartingOffsets>().is_err());
    }
}
