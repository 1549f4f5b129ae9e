use axum::{routing::get, Router};

use crate::handlers::{get_queue_stats, list_notifications, NotificationState};

/// Audit routes, mounted under `/notifications`.
pub fn notification_routes(state: NotificationState) -> Router {
    Router::new()
        .route("/", get(list_notifications))
        .route("/stats", get(get_queue_stats))
        .with_state(state)
}
