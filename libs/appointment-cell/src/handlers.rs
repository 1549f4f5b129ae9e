use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::Booking;

use crate::models::{CreateBookingRequest, RescheduleBookingRequest, UpdateBookingStatusRequest};
use crate::services::booking::BookingConflictGuard;

#[axum::debug_handler]
pub async fn create_booking(
    State(guard): State<Arc<BookingConflictGuard>>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = guard.create_booking(request).await?;
    Ok(Json(booking))
}

#[axum::debug_handler]
pub async fn get_booking(
    State(guard): State<Arc<BookingConflictGuard>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = guard.get_booking(booking_id).await?;
    Ok(Json(booking))
}

#[axum::debug_handler]
pub async fn reschedule_booking(
    State(guard): State<Arc<BookingConflictGuard>>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<RescheduleBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = guard.reschedule_booking(booking_id, request).await?;
    Ok(Json(booking))
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(guard): State<Arc<BookingConflictGuard>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = guard.cancel_booking(booking_id).await?;
    Ok(Json(booking))
}

#[axum::debug_handler]
pub async fn update_booking_status(
    State(guard): State<Arc<BookingConflictGuard>>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<UpdateBookingStatusRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = guard.update_status(booking_id, request.status).await?;
    Ok(Json(booking))
}
