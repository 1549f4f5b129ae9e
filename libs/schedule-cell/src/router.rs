use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::services::availability::AvailabilityResolver;

/// Provider schedule routes, mounted under `/providers`.
pub fn schedule_routes(resolver: Arc<AvailabilityResolver>) -> Router {
    Router::new()
        .route("/{provider_id}/slot-check", get(handlers::check_slot))
        .route("/{provider_id}/available-slots", get(handlers::get_available_slots))
        .route("/{provider_id}/schedule-rules", post(handlers::create_schedule_rule))
        .route("/{provider_id}/overrides", post(handlers::create_override))
        .with_state(resolver)
}
