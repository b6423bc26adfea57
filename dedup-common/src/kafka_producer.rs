use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication, TopicResult};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::FromClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::health::HealthHandle;

// Upper bound on a single raw connection attempt during bootstrap
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ADMIN_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

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
        self.liveness.report_healthy_blocking();

        metrics::gauge!("kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        metrics::gauge!("kafka_callback_queue_depth").set(stats.replyq as f64);
    }
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("no kafka broker address configured")]
    NoBrokers,
    #[error("could not connect to kafka at {brokers} after {attempts} attempts")]
    Unreachable { brokers: String, attempts: u32 },
    #[error("failed to create kafka producer: {0}")]
    Producer(#[from] KafkaError),
}

/// Outcome of the topic creation request issued during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicStatus {
    Created,
    AlreadyExists,
    Failed(String),
}

/// Wait for any of the brokers to accept a raw TCP connection.
///
/// Every address is tried once per attempt, with `delay` between attempts.
/// Returns the first address that accepted a connection.
pub async fn wait_for_brokers(
    brokers: &[String],
    attempts: u32,
    delay: Duration,
) -> Result<String, BootstrapError> {
    if brokers.is_empty() {
        return Err(BootstrapError::NoBrokers);
    }

    for attempt in 1..=attempts {
        for broker in brokers {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(broker.as_str())).await {
                Ok(Ok(_)) => {
                    info!("connected to kafka at {}", broker);
                    return Ok(broker.clone());
                }
                Ok(Err(e)) => warn!(
                    "failed to connect to kafka at {} (attempt {}/{}): {}",
                    broker, attempt, attempts, e
                ),
                Err(_) => warn!(
                    "timed out connecting to kafka at {} (attempt {}/{})",
                    broker, attempt, attempts
                ),
            }
        }

        if attempt < attempts {
            info!("retrying kafka connection in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    Err(BootstrapError::Unreachable {
        brokers: brokers.join(","),
        attempts,
    })
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.kafka_hosts);

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = client_config(config);
    client_config
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        );

    debug!("rdkafka configuration: {:?}", client_config);
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
            return Err(error);
        }
    }

    Ok(api)
}

fn topic_status(results: Vec<TopicResult>) -> TopicStatus {
    match results.into_iter().next() {
        Some(Ok(_)) => TopicStatus::Created,
        Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => TopicStatus::AlreadyExists,
        Some(Err((_, code))) => TopicStatus::Failed(code.to_string()),
        None => TopicStatus::Failed("empty create topics response".to_owned()),
    }
}

/// Ask the brokers to create the target topic. Never fatal: a topic that
/// already exists is the steady state, anything else is logged.
pub async fn ensure_topic(config: &KafkaConfig) -> TopicStatus {
    let topic = config.kafka_topic.as_str();

    let admin: AdminClient<DefaultClientContext> =
        match AdminClient::from_config(&client_config(config)) {
            Ok(admin) => admin,
            Err(e) => {
                warn!("failed to create kafka admin client: {}", e);
                return TopicStatus::Failed(e.to_string());
            }
        };

    let new_topic = NewTopic::new(
        topic,
        config.kafka_topic_partitions,
        TopicReplication::Fixed(config.kafka_topic_replication),
    );
    // The request timeout bounds the client side wait, librdkafka defaults it to 60s
    let options = AdminOptions::new()
        .operation_timeout(Some(ADMIN_OPERATION_TIMEOUT))
        .request_timeout(Some(ADMIN_OPERATION_TIMEOUT));

    let status = match admin.create_topics(&[new_topic], &options).await {
        Ok(results) => topic_status(results),
        Err(e) => TopicStatus::Failed(e.to_string()),
    };

    match &status {
        TopicStatus::Created => info!("kafka topic {} created", topic),
        TopicStatus::AlreadyExists => info!("kafka topic {} already exists", topic),
        TopicStatus::Failed(reason) => {
            warn!("failed to create kafka topic {}: {}", topic, reason)
        }
    }

    status
}

/// Run the startup sequence against the brokers: wait for connectivity, make sure
/// the topic exists, then build the producer reused for every publish.
pub async fn bootstrap(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, BootstrapError> {
    wait_for_brokers(
        &config.broker_addresses(),
        config.kafka_bootstrap_attempts,
        config.kafka_bootstrap_delay_ms.0,
    )
    .await?;

    ensure_topic(config).await;

    Ok(create_kafka_producer(config, liveness).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvMsDuration, NonEmptyString};
    use crate::health::HealthRegistry;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use tokio::net::TcpListener;

    fn mock_config(cluster: &MockCluster<'static, DefaultProducerContext>) -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: cluster.bootstrap_servers(),
            kafka_topic: NonEmptyString("unique-id-count".to_owned()),
            kafka_message_key: NonEmptyString("unique-id-count".to_owned()),
            kafka_topic_partitions: 1,
            kafka_topic_replication: 1,
            kafka_bootstrap_attempts: 2,
            kafka_bootstrap_delay_ms: EnvMsDuration(Duration::from_millis(10)),
            kafka_producer_linger_ms: 0,
            kafka_message_timeout_ms: 5000,
            kafka_tls: false,
        }
    }

    async fn unused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("no local addr").to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn wait_for_brokers_returns_first_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let reachable = listener.local_addr().unwrap().to_string();
        let unreachable = unused_address().await;

        let broker = wait_for_brokers(
            &[unreachable, reachable.clone()],
            3,
            Duration::from_millis(10),
        )
        .await
        .expect("broker should be reachable");

        assert_eq!(broker, reachable);
    }

    #[tokio::test]
    async fn wait_for_brokers_gives_up_after_attempts() {
        let unreachable = unused_address().await;

        let result = wait_for_brokers(&[unreachable], 3, Duration::from_millis(10)).await;

        match result {
            Err(BootstrapError::Unreachable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn wait_for_brokers_requires_an_address() {
        let result = wait_for_brokers(&[], 3, Duration::from_millis(10)).await;

        assert!(matches!(result, Err(BootstrapError::NoBrokers)));
    }

    #[tokio::test]
    async fn bootstrap_against_mock_cluster() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("rdkafka".to_string(), Duration::from_secs(30))
            .await;
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");

        let producer = bootstrap(&mock_config(&cluster), handle)
            .await
            .expect("failed to bootstrap against mock brokers");

        assert!(producer
            .client()
            .fetch_metadata(None, Duration::from_secs(5))
            .is_ok());
    }

    #[test]
    fn topic_status_classifies_create_results() {
        assert_eq!(
            topic_status(vec![Ok("unique-id-count".to_owned())]),
            TopicStatus::Created
        );
        assert_eq!(
            topic_status(vec![Err((
                "unique-id-count".to_owned(),
                RDKafkaErrorCode::TopicAlreadyExists
            ))]),
            TopicStatus::AlreadyExists
        );
        assert!(matches!(
            topic_status(vec![Err((
                "unique-id-count".to_owned(),
                RDKafkaErrorCode::InvalidReplicationFactor
            ))]),
            TopicStatus::Failed(_)
        ));
        assert!(matches!(topic_status(vec![]), TopicStatus::Failed(_)));
    }
}
