use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::BookingNotFound(id) => {
                AppError::NotFound(format!("Booking {} not found", id))
            }
            NotificationError::InvalidInput(msg) => AppError::BadRequest(msg),
            NotificationError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
