//! `SQLite`-backed persistence for the access-resolution engine.
//!
//! All stores share one [`StoreHandle`], an explicitly constructed
//! connection handle that is passed into the service layer rather than
//! living in module-level state. The handle owns schema initialization,
//! WAL journaling, and a bounded busy timeout, so no store call can block
//! indefinitely on a locked database.
//!
//! # Schema
//!
//! - `applications`: the directory registry (`app_id`, `code`, `name`,
//!   `status`).
//! - `departments`: department rows with the free-form `default_apps`
//!   policy column (JSON array or comma-separated list, ids or codes).
//! - `users`: portal users with their department name (the join key) and
//!   the privilege flag.
//! - `access_overrides`: at most one row per user. `active_default_ids`
//!   and `extra_ids` are the declared override; `limit_ids`,
//!   `accessible_ids`, `accessible_codes`, and `accessible_count` are the
//!   denormalized cache, written only by the sync writer.
//!
//! # Error taxonomy
//!
//! [`StoreError`] separates not-found conditions from retryable
//! unavailability (busy/locked database, poisoned lock) and fatal query
//! failures, so callers can retry a sync without guessing.

pub mod department;
pub mod directory;
pub mod overrides;
pub mod user;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

pub use department::DepartmentStore;
pub use directory::SqliteDirectory;
pub use overrides::{OverrideRow, OverrideStore};
pub use user::{UserId, UserRecord, UserStore};

/// Default bound on how long a store call may wait on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS applications (
    app_id  INTEGER PRIMARY KEY,
    code    TEXT NOT NULL UNIQUE,
    name    TEXT NOT NULL,
    status  TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS departments (
    dept_id      INTEGER PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    default_apps TEXT
);

CREATE TABLE IF NOT EXISTS users (
    user_id    INTEGER PRIMARY KEY,
    department TEXT NOT NULL,
    privileged INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_users_department ON users(department);

CREATE TABLE IF NOT EXISTS access_overrides (
    user_id            INTEGER PRIMARY KEY,
    active_default_ids TEXT,
    extra_ids          TEXT NOT NULL DEFAULT '[]',
    limit_ids          TEXT NOT NULL DEFAULT '[]',
    accessible_ids     TEXT NOT NULL DEFAULT '[]',
    accessible_codes   TEXT NOT NULL DEFAULT '[]',
    accessible_count   INTEGER NOT NULL DEFAULT 0,
    updated_at         TEXT NOT NULL
);
";

/// Errors from the store layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The requested row does not exist. Surfaced to the caller as a
    /// not-found condition; resolution is not attempted.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind ("user", "department", "application").
        entity: &'static str,
        /// The missing key.
        key: String,
    },

    /// The store could not be reached or is busy. Retryable; the caller
    /// must not assume a partial write occurred.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Underlying cause.
        message: String,
    },

    /// A query failed for a non-transient reason.
    #[error("store query failed: {message}")]
    Query {
        /// Underlying cause.
        message: String,
    },
}

impl StoreError {
    /// Whether a retry of the same operation can reasonably succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Whether this is a not-found condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(cause, _)
                if matches!(
                    cause.code,
                    rusqlite::ffi::ErrorCode::DatabaseBusy
                        | rusqlite::ffi::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::Unavailable {
                    message: err.to_string(),
                }
            },
            _ => Self::Query {
                message: err.to_string(),
            },
        }
    }
}

/// Shared connection handle. Cloning is cheap; clones refer to the same
/// underlying connection.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    conn: Arc<Mutex<Connection>>,
}

impl StoreHandle {
    /// Opens (creating if needed) the engine database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the database cannot be opened
    /// and `StoreError::Query` if schema initialization fails.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Unavailable {
            message: format!("failed to open {}: {e}", path.display()),
        })?;
        Self::init(conn, busy_timeout)
    }

    /// Opens an in-memory database, used by unit tests.
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
            message: format!("failed to open in-memory store: {e}"),
        })?;
        Self::init(conn, DEFAULT_BUSY_TIMEOUT)
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)
            .map_err(StoreError::from_sqlite)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(StoreError::from_sqlite)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::from_sqlite)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Locks the underlying connection. A poisoned lock maps to the
    /// retryable `Unavailable` variant.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Unavailable {
            message: "connection lock poisoned".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_initializes_schema() {
        let handle = StoreHandle::open_in_memory().unwrap();
        let conn = handle.lock().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                 AND name IN ('applications', 'departments', 'users', 'access_overrides')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = StoreError::NotFound {
            entity: "user",
            key: "7".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unavailable_is_retryable() {
        let err = StoreError::Unavailable {
            message: "database is locked".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }
}
