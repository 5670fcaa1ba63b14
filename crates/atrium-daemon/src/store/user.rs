//! The `users` table: department membership and the privilege flag.

use std::fmt;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::{StoreError, StoreHandle};

/// Identifier of a portal user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// User identifier.
    pub id: UserId,
    /// Department name, the join key into `departments`.
    pub department: String,
    /// Whether a per-user override record is consulted at all.
    pub privileged: bool,
}

/// User rows.
#[derive(Debug, Clone)]
pub struct UserStore {
    handle: StoreHandle,
}

impl UserStore {
    /// Creates a user view over the shared store.
    #[must_use]
    pub const fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Inserts a user in the given department, unprivileged.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails (including a duplicate id).
    pub fn insert_user(&self, id: UserId, department: &str) -> Result<(), StoreError> {
        let conn = self.handle.lock()?;
        insert_user(&conn, id, department)
    }

    /// Fetches a user row.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist.
    pub fn get(&self, id: UserId) -> Result<UserRecord, StoreError> {
        let conn = self.handle.lock()?;
        get_user(&conn, id)
    }

    /// Sets the privilege flag.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist.
    pub fn set_privilege_flag(&self, id: UserId, privileged: bool) -> Result<(), StoreError> {
        let conn = self.handle.lock()?;
        set_privilege_flag(&conn, id, privileged)
    }

    /// Moves a user to another department.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist.
    pub fn set_department(&self, id: UserId, department: &str) -> Result<(), StoreError> {
        let conn = self.handle.lock()?;
        set_department(&conn, id, department)
    }

    /// All users in a department, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn users_in_department(&self, department: &str) -> Result<Vec<UserRecord>, StoreError> {
        let conn = self.handle.lock()?;
        users_in_department(&conn, department)
    }
}

pub(crate) fn insert_user(conn: &Connection, id: UserId, department: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO users (user_id, department, privileged) VALUES (?1, ?2, 0)",
        params![id.0, department],
    )
    .map_err(StoreError::from_sqlite)?;
    Ok(())
}

pub(crate) fn set_department(
    conn: &Connection,
    id: UserId,
    department: &str,
) -> Result<(), StoreError> {
    let changed = conn
        .execute(
            "UPDATE users SET department = ?2 WHERE user_id = ?1",
            params![id.0, department],
        )
        .map_err(StoreError::from_sqlite)?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "user",
            key: id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn get_user(conn: &Connection, id: UserId) -> Result<UserRecord, StoreError> {
    conn.query_row(
        "SELECT user_id, department, privileged FROM users WHERE user_id = ?1",
        params![id.0],
        |row| {
            Ok(UserRecord {
                id: UserId(row.get(0)?),
                department: row.get(1)?,
                privileged: row.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
    .map_err(StoreError::from_sqlite)?
    .ok_or_else(|| StoreError::NotFound {
        entity: "user",
        key: id.to_string(),
    })
}

pub(crate) fn set_privilege_flag(
    conn: &Connection,
    id: UserId,
    privileged: bool,
) -> Result<(), StoreError> {
    let changed = conn
        .execute(
            "UPDATE users SET privileged = ?2 WHERE user_id = ?1",
            params![id.0, i64::from(privileged)],
        )
        .map_err(StoreError::from_sqlite)?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "user",
            key: id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn users_in_department(
    conn: &Connection,
    department: &str,
) -> Result<Vec<UserRecord>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT user_id, department, privileged FROM users \
             WHERE department = ?1 ORDER BY user_id",
        )
        .map_err(StoreError::from_sqlite)?;
    let rows = stmt
        .query_map(params![department], |row| {
            Ok(UserRecord {
                id: UserId(row.get(0)?),
                department: row.get(1)?,
                privileged: row.get::<_, i64>(2)? != 0,
            })
        })
        .map_err(StoreError::from_sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from_sqlite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let handle = StoreHandle::open_in_memory().unwrap();
        let store = UserStore::new(handle);
        store.insert_user(UserId(7), "sales").unwrap();
        let user = store.get(UserId(7)).unwrap();
        assert_eq!(user.department, "sales");
        assert!(!user.privileged);
    }

    #[test]
    fn test_get_missing_user() {
        let handle = StoreHandle::open_in_memory().unwrap();
        let store = UserStore::new(handle);
        let err = store.get(UserId(404)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_privilege_flag_roundtrip() {
        let handle = StoreHandle::open_in_memory().unwrap();
        let store = UserStore::new(handle);
        store.insert_user(UserId(7), "sales").unwrap();
        store.set_privilege_flag(UserId(7), true).unwrap();
        assert!(store.get(UserId(7)).unwrap().privileged);
        store.set_privilege_flag(UserId(7), false).unwrap();
        assert!(!store.get(UserId(7)).unwrap().privileged);
    }

    #[test]
    fn test_users_in_department_ordered() {
        let handle = StoreHandle::open_in_memory().unwrap();
        let store = UserStore::new(handle);
        store.insert_user(UserId(3), "sales").unwrap();
        store.insert_user(UserId(1), "sales").unwrap();
        store.insert_user(UserId(2), "support").unwrap();
        let members = store.users_in_department("sales").unwrap();
        assert_eq!(
            members.iter().map(|u| u.id).collect::<Vec<_>>(),
            vec![UserId(1), UserId(3)]
        );
    }

    #[test]
    fn test_set_department() {
        let handle = StoreHandle::open_in_memory().unwrap();
        let store = UserStore::new(handle);
        store.insert_user(UserId(1), "sales").unwrap();
        store.set_department(UserId(1), "support").unwrap();
        assert_eq!(store.get(UserId(1)).unwrap().department, "support");
    }
}
