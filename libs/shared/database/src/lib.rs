pub mod codec;
pub mod error;
pub mod repositories;
pub mod sqlite;

pub use error::{DatabaseError, DbResult};
pub use repositories::*;
pub use sqlite::Database;
