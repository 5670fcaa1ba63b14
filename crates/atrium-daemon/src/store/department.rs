//! The `departments` table and its free-form `default_apps` policy column.
//!
//! The column is opaque text at this layer; decoding it is the policy
//! parser's job. Users join to departments by name, not id, which is why
//! every operation here keys on the department name.

use rusqlite::{Connection, OptionalExtension, params};

use super::{StoreError, StoreHandle};

/// Department rows and their stored policy expressions.
#[derive(Debug, Clone)]
pub struct DepartmentStore {
    handle: StoreHandle,
}

impl DepartmentStore {
    /// Creates a department view over the shared store.
    #[must_use]
    pub const fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Inserts a department with an optional initial policy expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails (including a duplicate name).
    pub fn insert_department(&self, name: &str, policy: Option<&str>) -> Result<(), StoreError> {
        let conn = self.handle.lock()?;
        conn.execute(
            "INSERT INTO departments (name, default_apps) VALUES (?1, ?2)",
            params![name, policy],
        )
        .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    /// Returns the raw policy expression for a department, or `None` when
    /// the department has no row or no policy. A missing department is not
    /// an error on the read path; it resolves to an empty policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn policy_expression(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.handle.lock()?;
        policy_expression(&conn, name)
    }

    /// Replaces a department's stored policy expression.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the department has no row.
    pub fn set_policy_expression(&self, name: &str, raw: &str) -> Result<(), StoreError> {
        let conn = self.handle.lock()?;
        set_policy_expression(&conn, name, raw)
    }
}

pub(crate) fn policy_expression(
    conn: &Connection,
    name: &str,
) -> Result<Option<String>, StoreError> {
    let row: Option<Option<String>> = conn
        .query_row(
            "SELECT default_apps FROM departments WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::from_sqlite)?;
    Ok(row.flatten())
}

pub(crate) fn department_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM departments WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .map_err(StoreError::from_sqlite)?;
    Ok(count > 0)
}

pub(crate) fn set_policy_expression(
    conn: &Connection,
    name: &str,
    raw: &str,
) -> Result<(), StoreError> {
    let changed = conn
        .execute(
            "UPDATE departments SET default_apps = ?2 WHERE name = ?1",
            params![name, raw],
        )
        .map_err(StoreError::from_sqlite)?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "department",
            key: name.to_string(),
        });
    }
    Ok(())
}
