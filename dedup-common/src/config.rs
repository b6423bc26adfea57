use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(from = "KAFKA_BROKER", default = "localhost:9092")]
    pub kafka_hosts: String, // Comma separated host:port list

    #[envconfig(default = "unique-id-count")]
    pub kafka_topic: NonEmptyString,

    #[envconfig(default = "unique-id-count")]
    pub kafka_message_key: NonEmptyString, // Fixed partitioning key for every window count

    #[envconfig(default = "1")]
    pub kafka_topic_partitions: i32,

    #[envconfig(default = "1")]
    pub kafka_topic_replication: i32,

    #[envconfig(default = "10")]
    pub kafka_bootstrap_attempts: u32, // Raw connection attempts before giving up at startup

    #[envconfig(default = "5000")]
    pub kafka_bootstrap_delay_ms: EnvMsDuration,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}

impl KafkaConfig {
    /// The broker addresses as individual `host:port` entries.
    pub fn broker_addresses(&self) -> Vec<String> {
        self.kafka_hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// A duration read from the environment as a number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
