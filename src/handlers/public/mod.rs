mod activate;
mod events;
mod sync;
mod validate;

pub use activate::*;
pub use events::*;
pub use sync::*;
pub use validate::*;

use axum::{
    Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::extractors::Json;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/validate-license", post(validate_license))
        .route("/sync-drafts", post(sync_drafts))
        .route("/activate", post(activate_license))
        .route("/track-event", post(track_event))
        .route("/track_event", post(track_event_legacy))
}
