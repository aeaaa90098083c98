use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::{AppState, queries};
use crate::extractors::Json;
use crate::licensing::ledger::DEFAULT_PLAN;
use crate::models::NewEvent;
use crate::util::{extract_user_agent, non_empty, parse_client_timestamp};

const ANONYMOUS_LICENSE: &str = "anonymous";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventRequest {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub extension_version: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Anything else the client sends is kept alongside `metadata`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTrackEventRequest {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub draft_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrackEventResponse {
    pub success: bool,
}

/// Fold unknown top-level fields into the metadata object.
fn merge_metadata(metadata: Option<Value>, extra: Map<String, Value>) -> Option<Value> {
    if extra.is_empty() {
        return metadata;
    }
    match metadata {
        None => Some(Value::Object(extra)),
        Some(Value::Object(mut map)) => {
            for (k, v) in extra {
                map.entry(k).or_insert(v);
            }
            Some(Value::Object(map))
        }
        Some(other) => {
            let mut map = extra;
            map.insert("metadata".into(), other);
            Some(Value::Object(map))
        }
    }
}

fn store_event(state: &AppState, event: NewEvent) -> (StatusCode, Json<TrackEventResponse>) {
    let result = state
        .db
        .get()
        .map_err(crate::error::AppError::from)
        .and_then(|conn| queries::create_event(&conn, &event));

    match result {
        Ok(record) => {
            tracing::debug!("Tracked event {} ({})", record.event, record.id);
            (StatusCode::OK, Json(TrackEventResponse { success: true }))
        }
        Err(e) => {
            tracing::error!("Failed to store event {}: {}", event.event, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TrackEventResponse { success: false }),
            )
        }
    }
}

pub async fn track_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TrackEventRequest>,
) -> impl IntoResponse {
    let Some(event) = non_empty(request.event) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(TrackEventResponse { success: false }),
        );
    };

    let new_event = NewEvent {
        event,
        license_key: non_empty(request.license_key),
        plan: non_empty(request.plan),
        email: non_empty(request.email),
        extension_version: non_empty(request.extension_version),
        browser: non_empty(request.browser).or_else(|| extract_user_agent(&headers)),
        draft_id: None,
        metadata: merge_metadata(request.metadata, request.extra),
        occurred_at: request.timestamp.as_ref().and_then(parse_client_timestamp),
    };

    store_event(&state, new_event)
}

/// Older extension builds post here with a smaller payload.
pub async fn track_event_legacy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LegacyTrackEventRequest>,
) -> impl IntoResponse {
    let Some(event) = non_empty(request.event) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(TrackEventResponse { success: false }),
        );
    };

    let new_event = NewEvent {
        event,
        license_key: Some(
            non_empty(request.license_key).unwrap_or_else(|| ANONYMOUS_LICENSE.to_string()),
        ),
        plan: Some(non_empty(request.plan).unwrap_or_else(|| DEFAULT_PLAN.to_string())),
        browser: extract_user_agent(&headers),
        draft_id: non_empty(request.draft_id),
        ..Default::default()
    };

    store_event(&state, new_event)
}
