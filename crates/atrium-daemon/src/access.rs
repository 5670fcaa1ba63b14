//! The access service: the operation surface the HTTP layer calls into.
//!
//! Holds the explicitly constructed store handle and audit sink
//! (dependency injection, no module-level state) and exposes the four
//! operations with real invariants behind them:
//!
//! - [`AccessService::effective_access`]: the read path. Resolves the
//!   user's accessible application set from the department policy and any
//!   override record.
//! - [`AccessService::set_privilege`]: the privilege toggle. Enabling
//!   partitions the submitted id list against the live policy and
//!   replaces the override record wholesale; disabling deletes it. Both
//!   directions run inside one transaction, cache rewrite included, so a
//!   failure rolls back with no partial override state and a success is
//!   never observable with a stale cache.
//! - [`AccessService::toggle_policy_entry`]: adds or removes one
//!   application in a department's stored policy expression, then batch
//!   re-syncs the members that hold override rows.
//! - [`AccessService::reassign_department`] / [`AccessService::create_user`]:
//!   membership changes that re-sync before returning.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use atrium_core::directory::{AppId, DirectoryError};
use atrium_core::policy::{parse_expression, serialize_ids};
use atrium_core::resolver::{OverrideState, Resolution, partition_submission, resolve};
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::AuditSink;
use crate::store::directory::ConnDirectory;
use crate::store::{StoreError, StoreHandle, UserId, department, directory, overrides, user};
use crate::sync::{self, SyncReport};

/// Upper bound on the submitted application list for one privilege grant.
pub const MAX_SUBMITTED_APPS: usize = 1024;

/// Errors from the access service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AccessError {
    /// A store operation failed; carries the not-found / retryable /
    /// fatal distinction.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The application directory could not be reached.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// A submitted application list exceeds [`MAX_SUBMITTED_APPS`].
    #[error("submitted application list has {actual} entries, maximum is {max}")]
    SubmissionTooLarge {
        /// Submitted size.
        actual: usize,
        /// Allowed maximum.
        max: usize,
    },
}

impl AccessError {
    /// Whether this is a not-found condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_not_found())
    }

    /// Whether a retry of the same operation can reasonably succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::Directory(DirectoryError::Unavailable { .. }) => true,
            _ => false,
        }
    }
}

/// The engine's service facade.
pub struct AccessService {
    handle: StoreHandle,
    audit: Arc<dyn AuditSink>,
}

impl AccessService {
    /// Creates a service over the given store and audit sink.
    #[must_use]
    pub fn new(handle: StoreHandle, audit: Arc<dyn AuditSink>) -> Self {
        Self { handle, audit }
    }

    /// The shared store handle, for wiring stores and re-sync tooling.
    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.handle
    }

    /// Resolves the user's effective accessible application set.
    ///
    /// A missing department resolves as an empty policy; a stale override
    /// row under an unprivileged flag is ignored.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing user and store errors otherwise.
    pub fn effective_access(&self, user_id: UserId) -> Result<Resolution, AccessError> {
        let conn = self.handle.lock()?;
        let user = user::get_user(&conn, user_id)?;
        let raw = department::policy_expression(&conn, &user.department)?;
        let policy = parse_expression(raw.as_deref(), &ConnDirectory::new(&conn))?;
        let declared = if user.privileged {
            overrides::get_declared(&conn, user_id)?
        } else {
            None
        };
        Ok(resolve(user.privileged, &policy, declared.as_ref()))
    }

    /// Grants or revokes privileged access for a user.
    ///
    /// Enabling partitions `submitted` against the freshly parsed
    /// department policy: ids inside the policy become the enabled
    /// default subset, ids outside it become extra grants. The override
    /// record is replaced wholesale (a second enable never merges with
    /// prior state). Disabling deletes the record, restoring pure
    /// inheritance. Either way the privilege flag, the override row, and
    /// the cache change in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing user, `SubmissionTooLarge` for an
    /// oversized grant list, and store errors otherwise. On error nothing
    /// is persisted.
    pub fn set_privilege(
        &self,
        user_id: UserId,
        enabled: bool,
        submitted: &[i64],
    ) -> Result<(), AccessError> {
        if enabled && submitted.len() > MAX_SUBMITTED_APPS {
            return Err(AccessError::SubmissionTooLarge {
                actual: submitted.len(),
                max: MAX_SUBMITTED_APPS,
            });
        }

        let summary = {
            let mut conn = self.handle.lock()?;
            let tx = conn.transaction().map_err(StoreError::from_sqlite)?;
            let user = user::get_user(&tx, user_id)?;
            let now = Utc::now().to_rfc3339();

            let summary = if enabled {
                let raw = department::policy_expression(&tx, &user.department)?;
                let policy = parse_expression(raw.as_deref(), &ConnDirectory::new(&tx))?;
                let (active, extra) = partition_submission(&policy, submitted);

                overrides::upsert_declared(&tx, user_id, Some(&active), &extra, &now)?;
                user::set_privilege_flag(&tx, user_id, true)?;

                let declared = OverrideState {
                    active_default: Some(active),
                    extra,
                };
                let resolution = resolve(true, &policy, Some(&declared));
                let mut codes: Vec<String> =
                    directory::codes_by_ids(&tx, resolution.accessible())?
                        .into_iter()
                        .map(|entry| entry.code)
                        .collect();
                codes.sort_unstable();
                overrides::write_cache(&tx, user_id, &resolution, &codes, &now)?;

                format!(
                    "privilege enabled for user {user_id}: accessible=[{}] extra=[{}] limit=[{}]",
                    fmt_ids(resolution.accessible()),
                    fmt_ids(resolution.extra()),
                    fmt_ids(resolution.limit()),
                )
            } else {
                overrides::delete(&tx, user_id)?;
                user::set_privilege_flag(&tx, user_id, false)?;
                format!("privilege disabled for user {user_id}: reverted to department defaults")
            };

            tx.commit().map_err(StoreError::from_sqlite)?;
            summary
        };

        info!("{summary}");
        self.audit.record(&summary);
        Ok(())
    }

    /// Adds or removes one application in a department's default policy,
    /// returning whether the id is now present.
    ///
    /// The expression is re-read tolerantly, toggled on the resolved id
    /// set, and written back in the canonical JSON id-array form. Members
    /// holding override rows are re-synced before the call returns;
    /// per-member failures are logged and reported without aborting.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing department, or for an unknown
    /// application id when adding. Store errors otherwise.
    pub fn toggle_policy_entry(&self, dept: &str, app_id: AppId) -> Result<bool, AccessError> {
        let now_present = {
            let mut conn = self.handle.lock()?;
            let tx = conn.transaction().map_err(StoreError::from_sqlite)?;
            if !department::department_exists(&tx, dept)? {
                return Err(StoreError::NotFound {
                    entity: "department",
                    key: dept.to_string(),
                }
                .into());
            }

            let raw = department::policy_expression(&tx, dept)?;
            let policy = parse_expression(raw.as_deref(), &ConnDirectory::new(&tx))?;
            let mut ids: BTreeSet<AppId> = policy.ids.iter().copied().collect();

            let now_present = if ids.contains(&app_id) {
                ids.remove(&app_id);
                false
            } else {
                if !directory::application_exists(&tx, app_id)? {
                    return Err(StoreError::NotFound {
                        entity: "application",
                        key: app_id.to_string(),
                    }
                    .into());
                }
                ids.insert(app_id);
                true
            };

            let ordered: Vec<AppId> = ids.into_iter().collect();
            department::set_policy_expression(&tx, dept, &serialize_ids(&ordered))?;
            tx.commit().map_err(StoreError::from_sqlite)?;
            now_present
        };

        info!(
            "department {dept} policy toggled: app {app_id} now {}",
            if now_present { "present" } else { "absent" }
        );
        let report = sync::sync_department(&self.handle, dept)?;
        if !report.is_clean() {
            warn!(
                "policy toggle for {dept}: {} member re-syncs failed",
                report.failures.len()
            );
        }
        Ok(now_present)
    }

    /// Moves a user to another department and re-syncs them.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing user, store errors otherwise.
    pub fn reassign_department(&self, user_id: UserId, dept: &str) -> Result<(), AccessError> {
        {
            let conn = self.handle.lock()?;
            user::set_department(&conn, user_id, dept)?;
        }
        info!("user {user_id} reassigned to department {dept}");
        sync::sync_user(&self.handle, user_id)?;
        Ok(())
    }

    /// Creates an unprivileged user and runs the post-creation sync.
    ///
    /// # Errors
    ///
    /// Returns store errors, including a duplicate id.
    pub fn create_user(&self, user_id: UserId, dept: &str) -> Result<(), AccessError> {
        {
            let conn = self.handle.lock()?;
            user::insert_user(&conn, user_id, dept)?;
        }
        sync::sync_user(&self.handle, user_id)?;
        Ok(())
    }

    /// Administrative re-sync of one user.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing user, store errors otherwise.
    pub fn resync_user(&self, user_id: UserId) -> Result<sync::SyncOutcome, AccessError> {
        sync::sync_user(&self.handle, user_id)
    }

    /// Administrative re-sync of a whole department.
    ///
    /// # Errors
    ///
    /// Returns an error only when the member list cannot be read.
    pub fn resync_department(&self, dept: &str) -> Result<SyncReport, AccessError> {
        sync::sync_department(&self.handle, dept)
    }
}

fn fmt_ids(ids: &[AppId]) -> String {
    let mut out = String::new();
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{id}");
    }
    out
}
