pub mod actions;
pub mod dispatch;
pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router. Every route here is public — nothing in
/// the external interface calls for a bearer-token gate, unlike the
/// teacher's admin surface.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/health/slo", get(health::health_slo))
        .route("/health/index", get(health::health_index))
        .route("/health/db", get(health::health_db))
        .route("/chat/events", post(dispatch::dispatch))
        .route("/actions/:id/approve", post(actions::approve_action))
        .route("/actions/:id/deny", post(actions::deny_action))
}
