// libs/appointment-cell/src/models.rs
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use schedule_cell::AvailabilityError;
use shared_database::DatabaseError;
use shared_models::error::AppError;
use shared_models::{BookingStatus, NewBooking, ReminderSettings};

pub const MAX_DURATION_MINUTES: u32 = 720;
pub const MAX_LEAD_MINUTES: u32 = 43_200;
pub const MAX_LEAD_TIMES: usize = 5;

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub clinic_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: u32,
    /// Defaults to `pending`. Only `pending` and `confirmed` are accepted on create.
    pub status: Option<BookingStatus>,
    pub reminder_settings: Option<ReminderSettings>,
    pub notes: Option<String>,
}

impl CreateBookingRequest {
    pub fn initial_status(&self) -> BookingStatus {
        self.status.unwrap_or(BookingStatus::Pending)
    }

    pub fn into_new_booking(self) -> NewBooking {
        let status = self.initial_status();
        NewBooking {
            clinic_id: self.clinic_id,
            provider_id: self.provider_id,
            service_id: self.service_id,
            patient_id: self.patient_id,
            patient_name: self.patient_name.trim().to_string(),
            patient_email: non_blank(self.patient_email),
            patient_phone: non_blank(self.patient_phone),
            appointment_date: self.appointment_date,
            appointment_time: self.appointment_time,
            duration_minutes: self.duration_minutes,
            status,
            reminder_settings: self.reminder_settings,
            notes: self.notes,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleBookingRequest {
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBookingStatusRequest {
    pub status: BookingStatus,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Provider not found: {0}")]
    ProviderNotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Slot unavailable: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for BookingError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(msg) => BookingError::Conflict(msg),
            DatabaseError::InvalidValue(msg) => BookingError::InvalidInput(msg),
            other => BookingError::Database(other),
        }
    }
}

impl From<AvailabilityError> for BookingError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::InvalidInput(msg) => BookingError::InvalidInput(msg),
            AvailabilityError::ProviderNotFound(id) => BookingError::ProviderNotFound(id),
            AvailabilityError::Conflict(msg) => BookingError::Conflict(msg),
            AvailabilityError::Database(e) => BookingError::from(e),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::NotFound(id) => AppError::NotFound(format!("Booking {} not found", id)),
            BookingError::ProviderNotFound(id) => {
                AppError::NotFound(format!("Provider {} not found", id))
            }
            BookingError::InvalidInput(msg) => AppError::ValidationError(msg),
            BookingError::Conflict(msg) => AppError::Conflict(msg),
            BookingError::InvalidState(msg) => AppError::BadRequest(msg),
            BookingError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
