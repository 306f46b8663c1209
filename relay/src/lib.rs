//! Pool telemetry relay.
//!
//! Devices POST readings to `/pool-data`; accepted readings are published to
//! a message channel, the consumer side writes them to `pool_data`, and the
//! dashboard reads the latest records back from `GET /pool-data`.

pub mod auth;
pub mod config;
pub mod consumer;
pub mod db;
pub mod envelope;
pub mod errors;
pub mod ingress;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod publisher;
pub mod query;
pub mod store;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::SharedSecret;
use crate::consumer::Consumer;
use crate::publisher::PublisherPtr;
use crate::store::StorePtr;

/// Handles shared by every request; built once at start-up.
#[derive(Clone)]
pub struct AppState {
    pub secret: SharedSecret,
    pub publisher: PublisherPtr,
    pub store: StorePtr,
    pub consumer: Arc<Consumer>,
}

impl AppState {
    pub fn new(secret: SharedSecret, publisher: PublisherPtr, store: StorePtr) -> Self {
        let consumer = Arc::new(Consumer::new(store.clone()));
        Self {
            secret,
            publisher,
            store,
            consumer,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/pool-data",
            post(ingress::receive_reading)
                .get(query::latest_readings)
                .options(query::preflight),
        )
        .route("/push/pool-data", post(push_delivery))
        .route("/healthz", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/metrics", get(|| async { metrics::gather_metrics() }))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Channel messages pushed over HTTP. Always acknowledged so the pusher
/// never redelivers a message the consumer has already dropped.
async fn push_delivery(State(state): State<AppState>, body: Bytes) -> StatusCode {
    state.consumer.consume(&body).await;
    StatusCode::NO_CONTENT
}
