use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::error;

use crate::errors::Result;
use crate::metrics::{QUERY_LATENCY_SECONDS, STORE_FAILURES_TOTAL};
use crate::AppState;

pub const DEFAULT_LIMIT: usize = 100;

/// `OPTIONS /pool-data`, answered without authentication.
pub async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "3600"),
        ],
    )
}

/// `GET /pool-data?api_key=..&limit=..`
pub async fn latest_readings(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (status, body) = handle(&state, &params).await;
    (
        status,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(body),
    )
        .into_response()
}

pub async fn handle(state: &AppState, params: &HashMap<String, String>) -> (StatusCode, Value) {
    if !state.secret.verify(params.get("api_key").map(String::as_str)) {
        return (StatusCode::UNAUTHORIZED, json!({"error": "Unauthorized"}));
    }

    match read_latest(state, params.get("limit").map(String::as_str)).await {
        Ok(records) => (StatusCode::OK, records),
        Err(e) => {
            error!("Error retrieving data: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": e.to_string()}))
        }
    }
}

async fn read_latest(state: &AppState, limit: Option<&str>) -> Result<Value> {
    let limit = parse_limit(limit)?;

    let timer = QUERY_LATENCY_SECONDS.start_timer();
    let records = state.store.recent(limit).await.inspect_err(|_| {
        STORE_FAILURES_TOTAL.inc();
    })?;
    timer.observe_duration();

    Ok(serde_json::to_value(records)?)
}

/// A missing limit means the default; anything that is not a non-negative
/// integer is an error.
fn parse_limit(raw: Option<&str>) -> Result<usize> {
    match raw {
        None => Ok(DEFAULT_LIMIT),
        Some(raw) => Ok(raw.trim().parse()?),
    }
}
