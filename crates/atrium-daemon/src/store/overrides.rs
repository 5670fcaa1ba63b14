//! The `access_overrides` table: at most one row per user, lifecycle tied
//! to the privilege flag.
//!
//! A row has two kinds of columns. The declared columns
//! (`active_default_ids`, `extra_ids`) record what the operator submitted
//! and are written by the privilege toggle. The cache columns
//! (`limit_ids`, `accessible_ids`, `accessible_codes`,
//! `accessible_count`) are a derived view owned by the sync writer: the
//! only write path is the crate-private `write_cache`, so no other module
//! can drift the cache away from a recomputation.
//!
//! All id columns hold the canonical stored form, a JSON array of numbers
//! in ascending order, which keeps unchanged re-syncs byte-identical.

use std::collections::BTreeSet;

use atrium_core::directory::AppId;
use atrium_core::resolver::{OverrideState, Resolution};
use rusqlite::{Connection, OptionalExtension, params};

use super::{StoreError, StoreHandle, UserId};

/// A full override row as stored, cache columns included. Read-side type
/// for reporting and tests; mutation goes through the store functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRow {
    /// Owning user.
    pub user_id: UserId,
    /// Declared enabled subset, `None` for full inheritance.
    pub active_default_ids: Option<Vec<AppId>>,
    /// Declared grants outside department policy.
    pub extra_ids: Vec<AppId>,
    /// Cached revoked policy entries.
    pub limit_ids: Vec<AppId>,
    /// Cached accessible set.
    pub accessible_ids: Vec<AppId>,
    /// Cached accessible codes, lexicographic.
    pub accessible_codes: Vec<String>,
    /// Cached size of the accessible set.
    pub accessible_count: i64,
    /// RFC 3339 timestamp of the last cache write.
    pub updated_at: String,
}

/// Override rows.
#[derive(Debug, Clone)]
pub struct OverrideStore {
    handle: StoreHandle,
}

impl OverrideStore {
    /// Creates an override view over the shared store.
    #[must_use]
    pub const fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Fetches the declared override state for a user, if a row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or a stored column does not
    /// decode.
    pub fn declared(&self, user_id: UserId) -> Result<Option<OverrideState>, StoreError> {
        let conn = self.handle.lock()?;
        get_declared(&conn, user_id)
    }

    /// Fetches the full stored row, cache columns included.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or a stored column does not
    /// decode.
    pub fn row(&self, user_id: UserId) -> Result<Option<OverrideRow>, StoreError> {
        let conn = self.handle.lock()?;
        get_row(&conn, user_id)
    }
}

fn encode_ids(ids: &[AppId]) -> String {
    let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
    serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
}

fn encode_id_set(ids: &BTreeSet<AppId>) -> String {
    let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
    serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
}

fn decode_ids(column: &str, raw: &str) -> Result<Vec<AppId>, StoreError> {
    let parsed: Vec<i64> = serde_json::from_str(raw).map_err(|e| StoreError::Query {
        message: format!("corrupt {column} column: {e}"),
    })?;
    Ok(parsed.into_iter().map(AppId).collect())
}

fn decode_codes(raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Query {
        message: format!("corrupt accessible_codes column: {e}"),
    })
}

/// Inserts or fully replaces the declared override for a user. A second
/// enable replaces prior state, never merges with it. The cache columns
/// are reset; the caller refills them through the sync writer inside the
/// same transaction.
pub(crate) fn upsert_declared(
    conn: &Connection,
    user_id: UserId,
    active_default: Option<&BTreeSet<AppId>>,
    extra: &BTreeSet<AppId>,
    now: &str,
) -> Result<(), StoreError> {
    let active_json = active_default.map(encode_id_set);
    conn.execute(
        "INSERT INTO access_overrides \
             (user_id, active_default_ids, extra_ids, limit_ids, \
              accessible_ids, accessible_codes, accessible_count, updated_at) \
         VALUES (?1, ?2, ?3, '[]', '[]', '[]', 0, ?4) \
         ON CONFLICT(user_id) DO UPDATE SET \
             active_default_ids = excluded.active_default_ids, \
             extra_ids = excluded.extra_ids, \
             limit_ids = '[]', \
             accessible_ids = '[]', \
             accessible_codes = '[]', \
             accessible_count = 0, \
             updated_at = excluded.updated_at",
        params![user_id.0, active_json, encode_id_set(extra), now],
    )
    .map_err(StoreError::from_sqlite)?;
    Ok(())
}

/// Deletes a user's override row. Returns whether a row existed.
pub(crate) fn delete(conn: &Connection, user_id: UserId) -> Result<bool, StoreError> {
    let changed = conn
        .execute(
            "DELETE FROM access_overrides WHERE user_id = ?1",
            params![user_id.0],
        )
        .map_err(StoreError::from_sqlite)?;
    Ok(changed > 0)
}

pub(crate) fn get_declared(
    conn: &Connection,
    user_id: UserId,
) -> Result<Option<OverrideState>, StoreError> {
    let row: Option<(Option<String>, String)> = conn
        .query_row(
            "SELECT active_default_ids, extra_ids FROM access_overrides WHERE user_id = ?1",
            params![user_id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(StoreError::from_sqlite)?;

    let Some((active_raw, extra_raw)) = row else {
        return Ok(None);
    };
    let active_default = match active_raw {
        Some(raw) => Some(
            decode_ids("active_default_ids", &raw)?
                .into_iter()
                .collect::<BTreeSet<AppId>>(),
        ),
        None => None,
    };
    let extra: BTreeSet<AppId> = decode_ids("extra_ids", &extra_raw)?.into_iter().collect();
    Ok(Some(OverrideState {
        active_default,
        extra,
    }))
}

pub(crate) fn get_row(
    conn: &Connection,
    user_id: UserId,
) -> Result<Option<OverrideRow>, StoreError> {
    let row: Option<(Option<String>, String, String, String, String, i64, String)> = conn
        .query_row(
            "SELECT active_default_ids, extra_ids, limit_ids, accessible_ids, \
                    accessible_codes, accessible_count, updated_at \
             FROM access_overrides WHERE user_id = ?1",
            params![user_id.0],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()
        .map_err(StoreError::from_sqlite)?;

    let Some((active_raw, extra_raw, limit_raw, accessible_raw, codes_raw, count, updated_at)) =
        row
    else {
        return Ok(None);
    };
    Ok(Some(OverrideRow {
        user_id,
        active_default_ids: active_raw
            .map(|raw| decode_ids("active_default_ids", &raw))
            .transpose()?,
        extra_ids: decode_ids("extra_ids", &extra_raw)?,
        limit_ids: decode_ids("limit_ids", &limit_raw)?,
        accessible_ids: decode_ids("accessible_ids", &accessible_raw)?,
        accessible_codes: decode_codes(&codes_raw)?,
        accessible_count: count,
        updated_at,
    }))
}

/// Rewrites the cache columns from a fresh resolution. Skips the write
/// when the stored cache already matches, so a no-op sync leaves the row
/// byte-identical (timestamp included). Returns whether a write happened.
pub(crate) fn write_cache(
    conn: &Connection,
    user_id: UserId,
    resolution: &Resolution,
    accessible_codes: &[String],
    now: &str,
) -> Result<bool, StoreError> {
    let current: Option<(String, String, String, i64)> = conn
        .query_row(
            "SELECT limit_ids, accessible_ids, accessible_codes, accessible_count \
             FROM access_overrides WHERE user_id = ?1",
            params![user_id.0],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .map_err(StoreError::from_sqlite)?;
    let Some(current) = current else {
        return Ok(false);
    };

    let limit_json = encode_ids(resolution.limit());
    let accessible_json = encode_ids(resolution.accessible());
    let codes_json = serde_json::to_string(accessible_codes).map_err(|e| StoreError::Query {
        message: format!("failed to encode accessible_codes: {e}"),
    })?;
    let count = i64::try_from(resolution.accessible_count()).unwrap_or(i64::MAX);

    if current == (limit_json.clone(), accessible_json.clone(), codes_json.clone(), count) {
        return Ok(false);
    }

    conn.execute(
        "UPDATE access_overrides SET \
             limit_ids = ?2, accessible_ids = ?3, accessible_codes = ?4, \
             accessible_count = ?5, updated_at = ?6 \
         WHERE user_id = ?1",
        params![user_id.0, limit_json, accessible_json, codes_json, count, now],
    )
    .map_err(StoreError::from_sqlite)?;
    Ok(true)
}
