use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::AppError;
use crate::extractors::Json;
use crate::licensing::ledger::{self, UsageSync};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDraftsRequest {
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub used: Option<i64>,
    #[serde(default, alias = "clientId")]
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncDraftsResponse {
    pub success: bool,
}

/// Append a usage delta to the ledger.
pub async fn sync_drafts(
    State(state): State<AppState>,
    Json(request): Json<SyncDraftsRequest>,
) -> impl IntoResponse {
    let result = state.db.get().map_err(AppError::from).and_then(|conn| {
        ledger::record(
            &conn,
            &UsageSync {
                license_key: request.license_key.as_deref().unwrap_or_default(),
                device_id: request.device_id.as_deref(),
                plan: request.plan.as_deref(),
                variant: request.variant.as_deref(),
                quantity: request.used,
            },
        )
    });

    match result {
        Ok(record) => {
            tracing::debug!(
                "Recorded {} draft(s) for license {}",
                record.quantity,
                record.license_key
            );
            (StatusCode::OK, Json(SyncDraftsResponse { success: true }))
        }
        Err(AppError::BadRequest(msg)) => {
            tracing::warn!("/sync-drafts rejected: {}", msg);
            (
                StatusCode::BAD_REQUEST,
                Json(SyncDraftsResponse { success: false }),
            )
        }
        Err(e) => {
            tracing::error!("/sync-drafts failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SyncDraftsResponse { success: false }),
            )
        }
    }
}
