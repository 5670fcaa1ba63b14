//! The cache writer: keeps the denormalized override columns equal to a
//! fresh resolver run.
//!
//! Every mutation path that can change a resolution input (department
//! policy edit, department reassignment, privilege toggle, override edit)
//! funnels through here before it reports success, so external readers
//! never observe a cache that disagrees with a recomputation for long.
//!
//! [`sync_user`] re-reads the policy and override state from the store
//! inside one transaction rather than trusting any in-memory value, so a
//! concurrent policy edit can at worst leave the cache reflecting the
//! older snapshot it read, never an internally inconsistent mix of two.
//! It is idempotent: when the recomputed cache equals the stored row the
//! write is skipped entirely and the row stays byte-identical.
//!
//! [`sync_department`] is the batch variant used after policy edits. Users
//! are processed independently; one failure is collected into the report
//! and the rest of the batch continues.

use atrium_core::policy::parse_expression;
use atrium_core::resolver::resolve;
use chrono::Utc;
use tracing::{debug, warn};

use crate::access::AccessError;
use crate::store::directory::ConnDirectory;
use crate::store::{StoreError, StoreHandle, UserId, department, directory, overrides, user};

/// What a sync call found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The user holds no override row; inheritance is derived on read and
    /// nothing is cached.
    NoOverride,
    /// The user is unprivileged but a stale override row existed; it was
    /// removed to restore pure inheritance.
    StaleOverrideRemoved,
    /// The cached columns already matched the recomputation.
    Unchanged,
    /// The cached columns were rewritten.
    Updated,
}

/// One user's failure inside a batch sync.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    /// The user whose sync failed.
    pub user_id: UserId,
    /// Why, in display form.
    pub error: String,
    /// Whether a retry could succeed.
    pub retryable: bool,
}

/// Result of a department-wide re-sync.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// How many members were examined.
    pub examined: usize,
    /// Members whose cache was rewritten.
    pub updated: Vec<UserId>,
    /// Members whose sync failed; the batch continued past them.
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    /// Whether every member synced cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Recomputes and rewrites one user's cached accessible set.
///
/// # Errors
///
/// Returns `NotFound` for a missing user and store errors otherwise. A
/// missing department is not an error; it resolves as an empty policy.
pub fn sync_user(handle: &StoreHandle, user_id: UserId) -> Result<SyncOutcome, AccessError> {
    let mut conn = handle.lock()?;
    let tx = conn.transaction().map_err(StoreError::from_sqlite)?;

    let user = user::get_user(&tx, user_id)?;
    let Some(declared) = overrides::get_declared(&tx, user_id)? else {
        return Ok(SyncOutcome::NoOverride);
    };

    if !user.privileged {
        // Lifecycle says the row should have died with the flag; repair
        // the drift so inheritance is unambiguous.
        overrides::delete(&tx, user_id)?;
        tx.commit().map_err(StoreError::from_sqlite)?;
        debug!("removed stale override row for unprivileged user {user_id}");
        return Ok(SyncOutcome::StaleOverrideRemoved);
    }

    let raw = department::policy_expression(&tx, &user.department)?;
    let policy = parse_expression(raw.as_deref(), &ConnDirectory::new(&tx))?;
    let resolution = resolve(true, &policy, Some(&declared));

    let mut codes: Vec<String> = directory::codes_by_ids(&tx, resolution.accessible())?
        .into_iter()
        .map(|entry| entry.code)
        .collect();
    codes.sort_unstable();

    let written = overrides::write_cache(
        &tx,
        user_id,
        &resolution,
        &codes,
        &Utc::now().to_rfc3339(),
    )?;
    tx.commit().map_err(StoreError::from_sqlite)?;

    if written {
        debug!(
            "cache rewritten for user {user_id}: {} accessible",
            resolution.accessible_count()
        );
        Ok(SyncOutcome::Updated)
    } else {
        Ok(SyncOutcome::Unchanged)
    }
}

/// Re-syncs every member of a department, continuing past individual
/// failures.
///
/// # Errors
///
/// Returns an error only when the member list itself cannot be read;
/// per-member failures land in the report instead.
pub fn sync_department(handle: &StoreHandle, dept: &str) -> Result<SyncReport, AccessError> {
    let members = {
        let conn = handle.lock()?;
        user::users_in_department(&conn, dept)?
    };

    let mut report = SyncReport {
        examined: members.len(),
        ..SyncReport::default()
    };
    for member in members {
        match sync_user(handle, member.id) {
            Ok(SyncOutcome::Updated) => report.updated.push(member.id),
            Ok(_) => {},
            Err(err) => {
                warn!("re-sync failed for user {} in {dept}: {err}", member.id);
                report.failures.push(SyncFailure {
                    user_id: member.id,
                    error: err.to_string(),
                    retryable: err.is_retryable(),
                });
            },
        }
    }
    Ok(report)
}
