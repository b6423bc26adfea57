use std::future::ready;

use axum::{routing, Router};
use tower_http::trace::TraceLayer;

use dedup_common::health::HealthRegistry;

use super::accept;
use crate::dedup::Deduplicator;
use crate::notifier::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub dedup: Deduplicator,
    pub notifier: Notifier,
}

pub fn add_routes(router: Router, state: AppState, liveness: HealthRegistry) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route(
            "/_liveness",
            routing::get(move || ready(liveness.get_status())),
        )
        .route(
            "/api/verve/accept",
            routing::get(accept::accept).with_state(state),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> &'static str {
    "dedup api"
}
