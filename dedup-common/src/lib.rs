pub mod config;
pub mod health;
pub mod kafka_producer;
pub mod messages;
pub mod metrics;
pub mod store;
