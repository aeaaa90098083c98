pub mod public;
pub mod webhooks;

use axum::Router;

use crate::db::AppState;

/// Every route the server exposes, before state and middleware layers.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(public::router())
        .merge(webhooks::router())
}
