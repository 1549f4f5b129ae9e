use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::{AvailabilityOverride, NewAvailabilityOverride, NewScheduleRule, ScheduleRule};

use crate::models::{
    AvailableSlotsQuery, AvailableSlotsResponse, SlotCheck, SlotCheckQuery, DEFAULT_SLOT_MINUTES,
};
use crate::services::availability::AvailabilityResolver;

#[axum::debug_handler]
pub async fn check_slot(
    State(resolver): State<Arc<AvailabilityResolver>>,
    Path(provider_id): Path<Uuid>,
    Query(query): Query<SlotCheckQuery>,
) -> Result<Json<SlotCheck>, AppError> {
    let check = resolver
        .is_slot_free(provider_id, query.date, query.start_time, query.duration_minutes)
        .await?;

    Ok(Json(check))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(resolver): State<Arc<AvailabilityResolver>>,
    Path(provider_id): Path<Uuid>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<AvailableSlotsResponse>, AppError> {
    let duration = query.duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES);
    let step = query.step_minutes.unwrap_or(duration);

    let slots = resolver
        .available_slots(provider_id, query.date, duration, step)
        .await?;

    Ok(Json(AvailableSlotsResponse {
        provider_id,
        date: query.date,
        slots,
    }))
}

#[axum::debug_handler]
pub async fn create_schedule_rule(
    State(resolver): State<Arc<AvailabilityResolver>>,
    Path(provider_id): Path<Uuid>,
    Json(request): Json<NewScheduleRule>,
) -> Result<Json<ScheduleRule>, AppError> {
    let rule = resolver.create_schedule_rule(provider_id, request).await?;
    Ok(Json(rule))
}

#[axum::debug_handler]
pub async fn create_override(
    State(resolver): State<Arc<AvailabilityResolver>>,
    Path(provider_id): Path<Uuid>,
    Json(request): Json<NewAvailabilityOverride>,
) -> Result<Json<AvailabilityOverride>, AppError> {
    let entry = resolver.create_override(provider_id, request).await?;
    Ok(Json(entry))
}
