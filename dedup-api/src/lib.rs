pub mod aggregator;
pub mod config;
pub mod dedup;
pub mod handlers;
pub mod notifier;
pub mod server;
pub mod sinks;
pub mod time;
