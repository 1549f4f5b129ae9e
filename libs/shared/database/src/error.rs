use thiserror::Error;

pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Database connection lock poisoned")]
    LockPoisoned,

    #[error("Database worker failed: {0}")]
    Worker(String),
}

impl DatabaseError {
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        DatabaseError::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Maps a UNIQUE/constraint violation onto `Conflict`, leaving other errors untouched.
    pub fn from_write(error: rusqlite::Error, conflict_message: &str) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::Conflict(conflict_message.to_string())
            }
            _ => DatabaseError::Sqlite(error),
        }
    }
}
