use common_kafka::kafka_producer::KafkaProduceError;
use thiserror::Error;

/// Per-record errors: the record is dropped and counted, the stream goes on.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record has no payload")]
    EmptyPayload,
    #[error("payload is not valid json: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload is json but not an object")]
    NotAnObject,
}

impl DecodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::EmptyPayload => "empty",
            DecodeError::Malformed(_) => "malformed",
            DecodeError::NotAnObject => "not_an_object",
        }
    }
}

#[derive(Error, Debug)]
pub enum ReferenceLoadError {
    #[error("failed to read reference rows: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("durable append failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to publish {failed} of {total} records: {first}")]
    Publish {
        failed: usize,
        total: usize,
        first: KafkaProduceError,
    },
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Publish { first, .. } => {
                !matches!(first, KafkaProduceError::SerializationError { .. })
            }
            SinkError::Database(_) | SinkError::Unavailable(_) => true,
        }
    }
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint is not valid json: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("checkpoint belongs to topic {found}, expected {expected}")]
    TopicMismatch { expected: String, found: String },
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("failed to create consumer: {0}")]
    Consumer(#[from] common_kafka::kafka_consumer::CreateConsumerError),
}

/// Errors that stop the run loop. The process exits non-zero and resumes
/// from the last checkpoint on restart.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("reference data unavailable: {0}")]
    Reference(#[from] ReferenceLoadError),
    #[error("input stream failed: {0}")]
    Stream(#[from] StreamError),
    #[error("batch {batch_id} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        batch_id: u64,
        attempts: u32,
        #[source]
        source: SinkError,
    },
    #[error("batch {batch_id} failed with a non-retryable error: {source}")]
    NonRetryable {
        batch_id: u64,
        #[source]
        source: SinkError,
    },
    #[error("failed to commit checkpoint for batch {batch_id}: {source}")]
    Checkpoint {
        batch_id: u64,
        #[source]
        source: CheckpointError,
    },
}
