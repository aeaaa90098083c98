use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::extractors::Json;
use crate::util::{format_timestamp, non_empty};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default, alias = "clientId")]
    pub device_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

fn refused(status: StatusCode) -> (StatusCode, Json<ActivateResponse>) {
    (status, Json(ActivateResponse::default()))
}

/// Activate a key with the provider directly, without touching local records.
pub async fn activate_license(
    State(state): State<AppState>,
    Json(request): Json<ActivateRequest>,
) -> impl IntoResponse {
    let Some(license_key) = non_empty(request.license_key) else {
        return refused(StatusCode::BAD_REQUEST);
    };
    let instance_name =
        non_empty(request.device_id).unwrap_or_else(|| state.activation_instance_name.clone());

    match state.gateway.activate(&license_key, &instance_name).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!("Provider refused activation of {}", license_key);
            return refused(StatusCode::OK);
        }
        Err(e) => {
            tracing::error!("Activation of {} failed: {}", license_key, e);
            return refused(StatusCode::BAD_GATEWAY);
        }
    }

    tracing::info!("Activated license {} for {}", license_key, instance_name);

    // Details are best-effort; the activation itself already succeeded
    let info = match state.gateway.validate(&license_key).await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("Post-activation lookup for {} failed: {}", license_key, e);
            None
        }
    };

    let response = match info {
        Some(info) => ActivateResponse {
            success: true,
            order_id: info.order_id,
            expires_at: info.expires_at.and_then(format_timestamp),
            variant: info.variant,
        },
        None => ActivateResponse {
            success: true,
            ..Default::default()
        },
    };

    (StatusCode::OK, Json(response))
}
