use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::extractors::Json;
use crate::licensing::{Decision, DenialReason, LicenseResolver};
use crate::util::format_timestamp;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateLicenseRequest {
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default, alias = "clientId")]
    pub device_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateLicenseResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

fn denial_status(reason: DenialReason) -> StatusCode {
    match reason {
        DenialReason::MissingDevice => StatusCode::BAD_REQUEST,
        DenialReason::DeviceSwitchCooldown => StatusCode::FORBIDDEN,
        DenialReason::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

fn server_error() -> (StatusCode, Json<ValidateLicenseResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ValidateLicenseResponse {
            allowed: false,
            reason: Some(DenialReason::ServerError),
            ..Default::default()
        }),
    )
}

pub async fn validate_license(
    State(state): State<AppState>,
    Json(request): Json<ValidateLicenseRequest>,
) -> impl IntoResponse {
    let resolver = LicenseResolver::new(state.db.clone(), state.gateway.clone());

    let decision = match resolver
        .resolve(request.license_key.as_deref(), request.device_id.as_deref())
        .await
    {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("/validate-license failed: {}", e);
            return server_error();
        }
    };

    match decision {
        Decision::Allowed(allowance) => (
            StatusCode::OK,
            Json(ValidateLicenseResponse {
                allowed: true,
                license_key: Some(allowance.license_key),
                used: Some(allowance.used),
                limit: Some(allowance.limit),
                expires_at: allowance.expires_at.and_then(format_timestamp),
                variant: Some(allowance.variant),
                ..Default::default()
            }),
        ),
        Decision::Denied(denial) => {
            tracing::debug!("Validation denied: {}", denial.reason.as_ref());
            (
                denial_status(denial.reason),
                Json(ValidateLicenseResponse {
                    allowed: false,
                    reason: Some(denial.reason),
                    message: denial.message,
                    used: denial.used,
                    limit: denial.limit,
                    ..Default::default()
                }),
            )
        }
    }
}
