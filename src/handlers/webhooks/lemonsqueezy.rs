use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use super::lifecycle;
use crate::db::AppState;
use crate::error::AppError;
use crate::payments::{LemonSqueezyWebhookEvent, verify_webhook_signature};

pub async fn handle_lemonsqueezy_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    // Signature covers the raw bytes, so check it before parsing anything
    match verify_webhook_signature(&state.webhook_secret, &body, signature) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("Rejected LemonSqueezy webhook with invalid signature");
            return (StatusCode::FORBIDDEN, "Invalid signature");
        }
        Err(e) => {
            tracing::error!("Cannot verify LemonSqueezy webhook: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signature check failed");
        }
    }

    let event: LemonSqueezyWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse LemonSqueezy webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let result = match event.meta.event_name.as_str() {
        "license_key_created" => lifecycle::process_license_key_created(&state, &event).await,
        "subscription_created" => lifecycle::process_subscription_created(&state, &event).await,
        "subscription_expired" => lifecycle::process_subscription_expired(&state, &event),
        "license_key_updated" => lifecycle::process_license_key_updated(&state, &event),
        other => {
            tracing::debug!("Ignoring LemonSqueezy event {}", other);
            return (StatusCode::OK, "Event ignored");
        }
    };

    match result {
        Ok(msg) => (StatusCode::OK, msg),
        Err(AppError::BadRequest(msg)) => {
            tracing::warn!("Rejected {} webhook: {}", event.meta.event_name, msg);
            (StatusCode::BAD_REQUEST, "Missing required fields")
        }
        Err(e) => {
            tracing::error!("Failed to process {} webhook: {}", event.meta.event_name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Webhook processing failed")
        }
    }
}
