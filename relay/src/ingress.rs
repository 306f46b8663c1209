use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::metrics::{
    PUBLISHED_TOTAL, PUBLISH_FAILURES_TOTAL, READINGS_TOTAL, REJECTED_READINGS_TOTAL,
};
use crate::model::Reading;
use crate::AppState;

const TEMPERATURE_FIELDS: [&str; 2] = ["temperature_c", "temperature_f"];

/// `POST /pool-data`
pub async fn receive_reading(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let (status, body) = handle(&state, &body).await;
    (status, Json(body))
}

/// Authenticates and validates one device report, then publishes it and
/// waits for the channel's acknowledgement before answering.
pub async fn handle(state: &AppState, body: &[u8]) -> (StatusCode, Value) {
    READINGS_TOTAL.inc();

    let map = match parse_object(body) {
        Some(map) => map,
        None => return reject(StatusCode::BAD_REQUEST, "invalid_json", "Invalid JSON".into()),
    };

    if !state
        .secret
        .verify(map.get("api_key").and_then(Value::as_str))
    {
        warn!("Rejected reading with invalid api_key");
        return reject(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized".into());
    }

    let missing = TEMPERATURE_FIELDS
        .iter()
        .any(|field| map.get(*field).map_or(true, Value::is_null));
    if missing {
        return reject(
            StatusCode::BAD_REQUEST,
            "missing_temperature",
            "Missing temperature data".into(),
        );
    }

    let reading = match Reading::from_map(map) {
        Ok(reading) => reading,
        Err(e) => {
            return reject(
                StatusCode::BAD_REQUEST,
                "invalid_reading",
                format!("Invalid reading: {}", e),
            )
        }
    };

    info!(
        "Received data from {}: {}C / {}F",
        reading.device(),
        reading.temperature_c,
        reading.temperature_f
    );

    match state.publisher.publish(&reading).await {
        Ok(message_id) => {
            PUBLISHED_TOTAL.inc();
            info!("Published message ID: {}", message_id);
            (
                StatusCode::OK,
                json!({"status": "success", "message": "Data received"}),
            )
        }
        Err(e) => {
            PUBLISH_FAILURES_TOTAL.inc();
            error!("Error publishing reading from {}: {}", reading.device(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": e.to_string()}))
        }
    }
}

/// A non-empty JSON object, or nothing.
fn parse_object(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}

fn reject(status: StatusCode, reason: &str, message: String) -> (StatusCode, Value) {
    REJECTED_READINGS_TOTAL.with_label_values(&[reason]).inc();
    (status, json!({"error": message}))
}
