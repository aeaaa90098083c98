mod lemonsqueezy;
pub mod lifecycle;

pub use lemonsqueezy::*;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/lemon-webhook", post(handle_lemonsqueezy_webhook))
}
