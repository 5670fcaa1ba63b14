//! The `applications` table: the engine's view of the directory registry.

use atrium_core::directory::{AppEntry, AppId, AppStatus, Application, Directory, DirectoryError};
use rusqlite::{Connection, params, params_from_iter};

use super::{StoreError, StoreHandle};

/// Directory lookups backed by the `applications` table.
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    handle: StoreHandle,
}

impl SqliteDirectory {
    /// Creates a directory view over the shared store.
    #[must_use]
    pub const fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Registers or replaces an application. The code is stored in its
    /// canonical uppercase form.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn insert_application(&self, app: &Application) -> Result<(), StoreError> {
        let conn = self.handle.lock()?;
        conn.execute(
            "INSERT INTO applications (app_id, code, name, status) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(app_id) DO UPDATE SET \
                 code = excluded.code, name = excluded.name, status = excluded.status",
            params![app.id.0, app.code.to_uppercase(), app.name, app.status.as_str()],
        )
        .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    /// Updates the lifecycle status of an application.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the application is not registered.
    pub fn set_status(&self, id: AppId, status: AppStatus) -> Result<(), StoreError> {
        let conn = self.handle.lock()?;
        let changed = conn
            .execute(
                "UPDATE applications SET status = ?2 WHERE app_id = ?1",
                params![id.0, status.as_str()],
            )
            .map_err(StoreError::from_sqlite)?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "application",
                key: id.to_string(),
            });
        }
        Ok(())
    }
}

impl Directory for SqliteDirectory {
    fn lookup_codes_by_ids(&self, ids: &[AppId]) -> Result<Vec<AppEntry>, DirectoryError> {
        let conn = self.handle.lock().map_err(to_directory_error)?;
        codes_by_ids(&conn, ids).map_err(to_directory_error)
    }

    fn lookup_ids_by_codes(&self, codes: &[String]) -> Result<Vec<AppEntry>, DirectoryError> {
        let conn = self.handle.lock().map_err(to_directory_error)?;
        ids_by_codes(&conn, codes).map_err(to_directory_error)
    }
}

/// Directory lookups over a borrowed connection, so the sync writer and
/// the service layer can resolve inside an open transaction.
pub(crate) struct ConnDirectory<'a> {
    conn: &'a Connection,
}

impl<'a> ConnDirectory<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl Directory for ConnDirectory<'_> {
    fn lookup_codes_by_ids(&self, ids: &[AppId]) -> Result<Vec<AppEntry>, DirectoryError> {
        codes_by_ids(self.conn, ids).map_err(to_directory_error)
    }

    fn lookup_ids_by_codes(&self, codes: &[String]) -> Result<Vec<AppEntry>, DirectoryError> {
        ids_by_codes(self.conn, codes).map_err(to_directory_error)
    }
}

fn to_directory_error(err: StoreError) -> DirectoryError {
    DirectoryError::Unavailable {
        message: err.to_string(),
    }
}

fn placeholders(count: usize) -> String {
    let mut sql = String::with_capacity(count * 3);
    for i in 0..count {
        if i > 0 {
            sql.push(',');
        }
        sql.push('?');
    }
    sql
}

pub(crate) fn codes_by_ids(conn: &Connection, ids: &[AppId]) -> Result<Vec<AppEntry>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT app_id, code FROM applications WHERE app_id IN ({}) ORDER BY app_id",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql).map_err(StoreError::from_sqlite)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter().map(|id| id.0)), |row| {
            Ok(AppEntry {
                id: AppId(row.get(0)?),
                code: row.get(1)?,
            })
        })
        .map_err(StoreError::from_sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from_sqlite)
}

pub(crate) fn ids_by_codes(
    conn: &Connection,
    codes: &[String],
) -> Result<Vec<AppEntry>, StoreError> {
    if codes.is_empty() {
        return Ok(Vec::new());
    }
    let canonical: Vec<String> = codes
        .iter()
        .map(|code| code.trim().to_uppercase())
        .collect();
    let sql = format!(
        "SELECT app_id, code FROM applications WHERE code IN ({}) ORDER BY app_id",
        placeholders(canonical.len())
    );
    let mut stmt = conn.prepare(&sql).map_err(StoreError::from_sqlite)?;
    let rows = stmt
        .query_map(params_from_iter(canonical.iter()), |row| {
            Ok(AppEntry {
                id: AppId(row.get(0)?),
                code: row.get(1)?,
            })
        })
        .map_err(StoreError::from_sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from_sqlite)
}

/// True when the application id is registered.
pub(crate) fn application_exists(conn: &Connection, id: AppId) -> Result<bool, StoreError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM applications WHERE app_id = ?1",
            params![id.0],
            |row| row.get(0),
        )
        .map_err(StoreError::from_sqlite)?;
    Ok(count > 0)
}
