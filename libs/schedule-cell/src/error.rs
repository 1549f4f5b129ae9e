use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(Uuid),

    #[error("Schedule conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::InvalidInput(msg) => AppError::ValidationError(msg),
            AvailabilityError::ProviderNotFound(id) => {
                AppError::NotFound(format!("Provider {} not found", id))
            }
            AvailabilityError::Conflict(msg) => AppError::Conflict(msg),
            AvailabilityError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
