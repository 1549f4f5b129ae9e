use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};

use shared_database::NotificationRepository;
use shared_models::error::AppError;
use shared_models::{NotificationFilter, NotificationStatus, QueueStats};
use shared_utils::Clock;

use crate::error::NotificationError;
use crate::models::NotificationListQuery;

/// Read-only view over the queue, shared by the audit endpoints.
#[derive(Clone)]
pub struct NotificationState {
    pub notifications: Arc<dyn NotificationRepository>,
    pub clock: Arc<dyn Clock>,
}

#[axum::debug_handler]
pub async fn list_notifications(
    State(state): State<NotificationState>,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<Value>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<NotificationStatus>)
        .transpose()
        .map_err(|e| NotificationError::InvalidInput(e.to_string()))?;

    let filter = NotificationFilter {
        status,
        recipient_id: query.recipient_id,
        booking_id: query.booking_id,
        limit: query.limit,
        offset: query.offset,
    };

    let notifications = state
        .notifications
        .list(&filter)
        .await
        .map_err(NotificationError::from)?;
    let total = state
        .notifications
        .count(&filter)
        .await
        .map_err(NotificationError::from)?;

    Ok(Json(json!({
        "notifications": notifications,
        "total": total
    })))
}

#[axum::debug_handler]
pub async fn get_queue_stats(
    State(state): State<NotificationState>,
) -> Result<Json<QueueStats>, AppError> {
    let stats = state
        .notifications
        .stats(state.clock.now())
        .await
        .map_err(NotificationError::from)?;

    Ok(Json(stats))
}
