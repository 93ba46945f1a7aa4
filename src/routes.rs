use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers::{self, AppState};

/// Provider and carrier webhooks. `main` wraps these with body-size and rate limits.
pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks/provider", post(handlers::provider_webhook))
        .route("/webhooks/sms", post(handlers::sms_webhook))
}

pub fn dashboard_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/dashboard/ws", get(handlers::dashboard_ws))
        .route("/api/v1/dashboard/recent", get(handlers::recent_calls))
}

/// All routes without middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .merge(webhook_routes())
        .merge(dashboard_routes())
        .with_state(state)
}
