use crate::config::{KafkaConfig, KafkaConfigError};

use health::HealthHandle;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientContext;
use serde::Serialize;
use serde_json::error::Error as SerdeError;
use thiserror::Error;
use tracing::{debug, error, info};

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        metrics::gauge!("kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        metrics::gauge!("kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
    }
}

#[derive(Error, Debug)]
pub enum CreateProducerError {
    #[error("invalid kafka configuration: {0}")]
    Config(#[from] KafkaConfigError),
    #[error("failed to create kafka producer: {0}")]
    Kafka(#[from] KafkaError),
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, CreateProducerError> {
    let mut client_config = config.client_config()?;
    client_config
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    debug!("rdkafka producer configuration: {:?}", client_config);
    let api: FutureProducer<KafkaContext> = client_config.create_with_context(liveness.into())?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error.into());
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to serialize: {error}")]
    SerializationError { error: SerdeError },
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Produces every item as one JSON message without a key, then waits for all
/// delivery reports. Results are returned in the order of the input items.
pub async fn send_iter_to_kafka<T, C: ClientContext + 'static>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    iter: impl IntoIterator<Item = T>,
) -> Vec<Result<(), KafkaProduceError>>
where
    T: Serialize,
{
    let mut results = Vec::new();
    let mut handles = Vec::new();

    for (index, item) in iter.into_iter().enumerate() {
        let payload = match serde_json::to_string(&item) {
            Ok(p) => p,
            Err(error) => {
                results.push((index, Err(KafkaProduceError::SerializationError { error })));
                continue;
            }
        };

        let record: FutureRecord<'_, (), String> = FutureRecord {
            topic,
            key: None,
            payload: Some(&payload),
            timestamp: None,
            partition: None,
            headers: None,
        };

        match kafka_producer.send_result(record) {
            Ok(delivery) => handles.push((index, delivery)),
            Err((error, _)) => {
                results.push((index, Err(KafkaProduceError::KafkaProduceError { error })))
            }
        }
    }

    for (index, delivery) in handles {
        match delivery.await {
            Ok(Ok(_)) => results.push((index, Ok(()))),
            Ok(Err((error, _))) => {
                results.push((index, Err(KafkaProduceError::KafkaProduceError { error })))
            }
            Err(_) => results.push((index, Err(KafkaProduceError::KafkaProduceCanceled))),
        }
    }

    // Sort to return in passed-in order
    results.sort_by_key(|e| e.0);

    results.into_iter().map(|(_, r)| r).collect()
}
