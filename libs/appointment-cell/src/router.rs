use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers;
use crate::services::booking::BookingConflictGuard;

/// Booking routes, mounted under `/bookings`.
pub fn booking_routes(guard: Arc<BookingConflictGuard>) -> Router {
    Router::new()
        .route("/", post(handlers::create_booking))
        .route(
            "/{booking_id}",
            get(handlers::get_booking)
                .patch(handlers::reschedule_booking)
                .delete(handlers::cancel_booking),
        )
        .route("/{booking_id}/status", patch(handlers::update_booking_status))
        .with_state(guard)
}
