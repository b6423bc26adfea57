use async_trait::async_trait;
use thiserror::Error;

use dedup_common::messages::UniqueCountMessage;

pub mod kafka;
pub mod print;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize window count: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to produce to kafka: {0}")]
    Produce(rdkafka::error::KafkaError),
    #[error("failed to produce to kafka (timeout)")]
    Canceled,
}

/// Destination of the per-window distinct counts.
#[async_trait]
pub trait CountSink {
    /// Send one window count, once. Callers drop the count on error.
    async fn send(&self, message: UniqueCountMessage) -> Result<(), PublishError>;
}
