use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{info, instrument};

use dedup_common::config::KafkaConfig;
use dedup_common::kafka_producer::KafkaContext;
use dedup_common::messages::UniqueCountMessage;

use super::{CountSink, PublishError};

/// Produces every window count to one topic, under one fixed key.
///
/// The producer is created once at bootstrap and shared by all sends.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    key: String,
}

impl KafkaSink {
    pub fn new(producer: FutureProducer<KafkaContext>, config: &KafkaConfig) -> KafkaSink {
        KafkaSink {
            producer,
            topic: config.kafka_topic.as_str().to_owned(),
            key: config.kafka_message_key.as_str().to_owned(),
        }
    }
}

#[async_trait]
impl CountSink for KafkaSink {
    #[instrument(skip_all)]
    async fn send(&self, message: UniqueCountMessage) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&message)?;

        let delivery = self
            .producer
            .send_result(FutureRecord {
                topic: self.topic.as_str(),
                payload: Some(&payload),
                partition: None,
                key: Some(self.key.as_str()),
                timestamp: None,
                headers: None,
            })
            .map_err(|(e, _)| PublishError::Produce(e))?;

        match delivery.await {
            Ok(Ok(_)) => {
                info!("published to kafka: {}", payload);
                Ok(())
            }
            Ok(Err((e, _))) => Err(PublishError::Produce(e)),
            // Cancelled due to timeout while retrying
            Err(_) => Err(PublishError::Canceled),
        }
    }
}
