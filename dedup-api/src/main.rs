use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use dedup_api::aggregator::Aggregator;
use dedup_api::config::Config;
use dedup_api::dedup::Deduplicator;
use dedup_api::handlers::{add_routes, AppState};
use dedup_api::notifier::Notifier;
use dedup_api::server::listen;
use dedup_api::sinks::{kafka::KafkaSink, print::PrintSink, CountSink};
use dedup_api::time::SystemTime;
use dedup_common::health::HealthRegistry;
use dedup_common::kafka_producer::bootstrap;
use dedup_common::metrics::setup_metrics_routes;
use dedup_common::store::RedisStore;

async fn shutdown() {
    let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!("failed to register SIGTERM handler: {}", e);
            return;
        }
    };
    let mut interrupt = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
        Ok(interrupt) => interrupt,
        Err(e) => {
            tracing::error!("failed to register SIGINT handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;
    config.validate().wrap_err("invalid configuration")?;

    let window = config.aggregation_interval_ms.0;

    let store = RedisStore::new(config.redis_url(), config.redis_timeout_ms.0)
        .await
        .wrap_err("failed to connect to redis")?;

    let liveness = HealthRegistry::new("liveness");
    let aggregator_liveness = liveness
        .register("aggregator".to_string(), window * 2)
        .await;

    let sink: Arc<dyn CountSink + Send + Sync> = if config.print_sink {
        tracing::info!("publishing window counts to the log");
        Arc::new(PrintSink {})
    } else {
        let kafka_liveness = liveness
            .register("rdkafka".to_string(), std::time::Duration::from_secs(30))
            .await;
        let producer = bootstrap(&config.kafka, kafka_liveness)
            .await
            .wrap_err("failed to bootstrap kafka")?;
        Arc::new(KafkaSink::new(producer, &config.kafka))
    };

    let timesource = Arc::new(SystemTime {});
    let dedup = Deduplicator::new(Arc::new(store), config.claim_key_prefix.as_str(), window);

    let (notifier, worker) = Notifier::new(
        dedup.clone(),
        timesource.clone(),
        config.notification_queue_size,
        config.notification_max_concurrency,
        config.notification_timeout_ms.0,
    )
    .wrap_err("failed to build notification client")?;
    let worker = tokio::spawn(worker.run());

    let aggregator = Aggregator::new(dedup.clone(), sink, timesource);

    let state = AppState { dedup, notifier };
    let app = setup_metrics_routes(add_routes(Router::new(), state, liveness));

    let served = tokio::select! {
        result = listen(app, config.bind(), shutdown()) => result.wrap_err("http server failed"),
        _ = aggregator.run(window, aggregator_liveness) => {
            Err(eyre::eyre!("aggregation loop exited"))
        }
    };
    if let Err(e) = &served {
        tracing::error!("{:?}", e);
    }

    // The router held the last notifier, the worker now finishes what is queued
    if let Err(e) = worker.await {
        tracing::error!("notification worker failed: {}", e);
    }
    tracing::info!("shutdown complete");

    served
}
