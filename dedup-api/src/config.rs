use envconfig::Envconfig;
use thiserror::Error;

use dedup_common::config::{EnvMsDuration, KafkaConfig, NonEmptyString};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "localhost")]
    pub redis_host: String,

    #[envconfig(default = "6379")]
    pub redis_port: u16,

    #[envconfig(default = "1000")]
    pub redis_timeout_ms: EnvMsDuration,

    #[envconfig(default = "unique-id:")]
    pub claim_key_prefix: NonEmptyString,

    #[envconfig(default = "60000")]
    pub aggregation_interval_ms: EnvMsDuration,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "1024")]
    pub notification_queue_size: usize,

    #[envconfig(default = "16")]
    pub notification_max_concurrency: usize,

    #[envconfig(default = "5000")]
    pub notification_timeout_ms: EnvMsDuration,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }

    /// Reject settings that would make the pipeline spin or never start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (
                "AGGREGATION_INTERVAL_MS",
                !self.aggregation_interval_ms.0.is_zero(),
            ),
            ("REDIS_TIMEOUT_MS", !self.redis_timeout_ms.0.is_zero()),
            ("NOTIFICATION_QUEUE_SIZE", self.notification_queue_size > 0),
            (
                "NOTIFICATION_MAX_CONCURRENCY",
                self.notification_max_concurrency > 0,
            ),
            (
                "NOTIFICATION_TIMEOUT_MS",
                !self.notification_timeout_ms.0.is_zero(),
            ),
            (
                "KAFKA_BOOTSTRAP_ATTEMPTS",
                self.kafka.kafka_bootstrap_attempts > 0,
            ),
            ("KAFKA_TOPIC_PARTITIONS", self.kafka.kafka_topic_partitions > 0),
            (
                "KAFKA_TOPIC_REPLICATION",
                self.kafka.kafka_topic_replication > 0,
            ),
        ];

        match checks.into_iter().find(|(_, valid)| !valid) {
            Some((name, _)) => Err(ConfigError::MustBePositive(name)),
            None => Ok(()),
        }
    }
}
