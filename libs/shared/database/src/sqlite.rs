use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{DatabaseError, DbResult};

/// Ordered schema migrations. Versions are applied once and recorded in `schema_version`.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "clinics_providers", include_str!("../migrations/001_clinics_providers.sql")),
    (2, "patients", include_str!("../migrations/002_patients.sql")),
    (3, "bookings", include_str!("../migrations/003_bookings.sql")),
    (4, "booking_patient_link", include_str!("../migrations/004_booking_patient_link.sql")),
    (5, "schedule", include_str!("../migrations/005_schedule.sql")),
    (6, "notifications", include_str!("../migrations/006_notifications.sql")),
    (7, "booking_reminder_flags", include_str!("../migrations/007_booking_reminder_flags.sql")),
    (8, "queue_constraints", include_str!("../migrations/008_queue_constraints.sql")),
    (9, "slot_holding_index", include_str!("../migrations/009_slot_holding_index.sql")),
];

/// Shared handle to the relational store.
///
/// Cloning is cheap; all clones share one connection. Statements run on tokio's blocking pool,
/// so a busy connection never stalls the async workers.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// In-memory database, used by tests and local experiments.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(mut conn: Connection) -> DbResult<Self> {
        configure_pragmas(&conn)?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Reads the applied version directly; only meant for startup checks and tests.
    pub fn schema_version(&self) -> DbResult<i64> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        current_version(&conn)
    }

    /// Runs `f` against the connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Connection) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| DatabaseError::Worker(e.to_string()))?
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction, committing only when it returns `Ok`.
    pub(crate) async fn with_immediate_tx<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }
}

fn configure_pragmas(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

/// Apply every migration newer than the recorded schema version, each in its own transaction.
pub fn run_migrations(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;

    let current = current_version(conn)?;
    debug!("Current schema version: {}", current);

    for (version, name, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        info!("Running migration v{} ({})", version, name);
        let tx = conn.transaction()?;
        tx.execute_batch(sql).map_err(|e| DatabaseError::MigrationFailed {
            version: *version,
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO schema_version (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
    }

    Ok(())
}

fn current_version(conn: &Connection) -> DbResult<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(version)
}

pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(version, _, _)| *version).unwrap_or(0)
}
