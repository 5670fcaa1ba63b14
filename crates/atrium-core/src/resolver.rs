//! The resolution kernel: one authoritative accessible set per user.
//!
//! A user's accessible applications reconcile two inputs:
//!
//! - the department's default policy (every member gets these), and
//! - an optional per-user override record holding an enabled subset of the
//!   policy (`active_default`) plus grants outside it (`extra`).
//!
//! [`resolve`] is a pure function of those inputs. Its output upholds two
//! invariants by construction, regardless of what the stored override row
//! claims:
//!
//! - `extra` is disjoint from the department policy. An id that is already
//!   in policy is never also "extra".
//! - `limit` (policy entries revoked for this user) is a subset of the
//!   policy and disjoint from `active_default`.
//!
//! Output ordering is deterministic (ascending id), so resolving unchanged
//! inputs always produces an identical result. The cache writer relies on
//! that to keep re-syncs byte-stable.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::directory::AppId;
use crate::policy::DepartmentPolicy;

/// The declared override inputs read from a user's override record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideState {
    /// The enabled subset of department policy, or `None` for full
    /// inheritance. An empty set is a valid restriction: it means "none of
    /// the department defaults".
    pub active_default: Option<BTreeSet<AppId>>,

    /// Grants outside the department policy.
    pub extra: BTreeSet<AppId>,
}

impl OverrideState {
    /// An override that inherits the full department policy.
    #[must_use]
    pub fn inherit_all() -> Self {
        Self::default()
    }
}

/// The resolved access decision for one user.
///
/// Constructed only by [`resolve`]; the fields are read-only so a stored
/// cache row can never drift from a recomputation except by bypassing this
/// module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    accessible: Vec<AppId>,
    active_default: Vec<AppId>,
    limit: Vec<AppId>,
    extra: Vec<AppId>,
}

impl Resolution {
    /// The final accessible set, ascending.
    #[must_use]
    pub fn accessible(&self) -> &[AppId] {
        &self.accessible
    }

    /// The enabled subset of department policy, ascending.
    #[must_use]
    pub fn active_default(&self) -> &[AppId] {
        &self.active_default
    }

    /// Department-policy entries revoked for this user, ascending.
    #[must_use]
    pub fn limit(&self) -> &[AppId] {
        &self.limit
    }

    /// Grants outside the department policy, ascending.
    #[must_use]
    pub fn extra(&self) -> &[AppId] {
        &self.extra
    }

    /// Size of the accessible set.
    #[must_use]
    pub fn accessible_count(&self) -> usize {
        self.accessible.len()
    }

    /// Checks the set-algebra invariants against the policy this
    /// resolution was computed from. Violations indicate a defect in a
    /// mutation path, not a runtime condition; this exists for tests.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn verify_invariants(&self, policy: &DepartmentPolicy) -> Result<(), InvariantViolation> {
        let policy_ids: BTreeSet<AppId> = policy.ids.iter().copied().collect();
        let active: BTreeSet<AppId> = self.active_default.iter().copied().collect();
        let extra: BTreeSet<AppId> = self.extra.iter().copied().collect();
        let limit: BTreeSet<AppId> = self.limit.iter().copied().collect();
        let accessible: BTreeSet<AppId> = self.accessible.iter().copied().collect();

        if let Some(id) = extra.intersection(&policy_ids).next() {
            return Err(InvariantViolation::ExtraOverlapsPolicy { id: *id });
        }
        if let Some(id) = limit.difference(&policy_ids).next() {
            return Err(InvariantViolation::LimitOutsidePolicy { id: *id });
        }
        if let Some(id) = limit.intersection(&active).next() {
            return Err(InvariantViolation::LimitOverlapsActive { id: *id });
        }
        let expected: BTreeSet<AppId> = active.union(&extra).copied().collect();
        if accessible != expected {
            return Err(InvariantViolation::AccessibleMismatch);
        }
        Ok(())
    }
}

/// A violated set-algebra invariant, found only by tests.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvariantViolation {
    /// An extra grant duplicates a department-policy entry.
    #[error("extra grant {id} overlaps department policy")]
    ExtraOverlapsPolicy {
        /// The overlapping id.
        id: AppId,
    },

    /// A limit entry references an id outside the department policy.
    #[error("limit entry {id} is not in department policy")]
    LimitOutsidePolicy {
        /// The out-of-policy id.
        id: AppId,
    },

    /// A limit entry is simultaneously enabled.
    #[error("limit entry {id} overlaps the active default set")]
    LimitOverlapsActive {
        /// The overlapping id.
        id: AppId,
    },

    /// The accessible set is not the union of active-default and extra.
    #[error("accessible set does not equal active-default union extra")]
    AccessibleMismatch,
}

/// Resolves a user's accessible application set.
///
/// - A non-privileged user, or a privileged user with no override record,
///   inherits the full department policy.
/// - An override with `active_default: None` also inherits fully; the
///   record exists only for bookkeeping.
/// - Otherwise the declared sets apply: `active_default` is intersected
///   with the live policy (entries the policy no longer grants fall away),
///   `limit` is the rest of the policy, and `extra` is the declared extra
///   set minus anything the policy meanwhile absorbed.
///
/// A missing department resolves through an empty policy rather than an
/// error, yielding whatever `extra` grants remain.
#[must_use]
pub fn resolve(
    privileged: bool,
    policy: &DepartmentPolicy,
    override_state: Option<&OverrideState>,
) -> Resolution {
    let policy_ids: BTreeSet<AppId> = policy.ids.iter().copied().collect();

    let declared = match override_state {
        Some(state) if privileged => state,
        _ => {
            return inherit_all(&policy_ids);
        },
    };

    let Some(declared_active) = &declared.active_default else {
        return inherit_all(&policy_ids);
    };

    let active: BTreeSet<AppId> = declared_active.intersection(&policy_ids).copied().collect();
    let limit: BTreeSet<AppId> = policy_ids.difference(&active).copied().collect();
    let extra: BTreeSet<AppId> = declared.extra.difference(&policy_ids).copied().collect();
    let accessible: BTreeSet<AppId> = active.union(&extra).copied().collect();

    let resolution = Resolution {
        accessible: accessible.into_iter().collect(),
        active_default: active.into_iter().collect(),
        limit: limit.into_iter().collect(),
        extra: extra.into_iter().collect(),
    };
    debug_assert!(resolution.verify_invariants(policy).is_ok());
    resolution
}

fn inherit_all(policy_ids: &BTreeSet<AppId>) -> Resolution {
    let all: Vec<AppId> = policy_ids.iter().copied().collect();
    Resolution {
        accessible: all.clone(),
        active_default: all,
        limit: Vec::new(),
        extra: Vec::new(),
    }
}

/// Splits a submitted full application-id list against the department
/// policy: ids inside the policy become the enabled default subset, ids
/// outside it become extra grants.
#[must_use]
pub fn partition_submission(
    policy: &DepartmentPolicy,
    submitted: &[i64],
) -> (BTreeSet<AppId>, BTreeSet<AppId>) {
    let mut enabled_default = BTreeSet::new();
    let mut extra = BTreeSet::new();
    for raw in submitted {
        let id = AppId(*raw);
        if policy.contains(id) {
            enabled_default.insert(id);
        } else {
            extra.insert(id);
        }
    }
    (enabled_default, extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(ids: &[i64]) -> DepartmentPolicy {
        DepartmentPolicy {
            ids: ids.iter().copied().map(AppId).collect(),
            codes: Vec::new(),
        }
    }

    fn ids(raw: &[i64]) -> Vec<AppId> {
        raw.iter().copied().map(AppId).collect()
    }

    fn set(raw: &[i64]) -> BTreeSet<AppId> {
        raw.iter().copied().map(AppId).collect()
    }

    #[test]
    fn test_unprivileged_inherits_policy() {
        let policy = policy(&[1, 2, 3]);
        let resolution = resolve(false, &policy, None);
        assert_eq!(resolution.accessible(), ids(&[1, 2, 3]));
        assert_eq!(resolution.active_default(), ids(&[1, 2, 3]));
        assert!(resolution.limit().is_empty());
        assert!(resolution.extra().is_empty());
    }

    #[test]
    fn test_unprivileged_ignores_stale_override() {
        // A leftover override row must not restrict a user whose
        // privilege flag is off.
        let policy = policy(&[1, 2, 3]);
        let stale = OverrideState {
            active_default: Some(set(&[1])),
            extra: set(&[9]),
        };
        let resolution = resolve(false, &policy, Some(&stale));
        assert_eq!(resolution.accessible(), ids(&[1, 2, 3]));
        assert!(resolution.extra().is_empty());
    }

    #[test]
    fn test_privileged_without_override_inherits() {
        let policy = policy(&[4, 7]);
        let resolution = resolve(true, &policy, None);
        assert_eq!(resolution.accessible(), ids(&[4, 7]));
    }

    #[test]
    fn test_null_active_default_inherits() {
        let policy = policy(&[1, 2]);
        let state = OverrideState::inherit_all();
        let resolution = resolve(true, &policy, Some(&state));
        assert_eq!(resolution.accessible(), ids(&[1, 2]));
        assert!(resolution.limit().is_empty());
    }

    #[test]
    fn test_submitted_set_partitions() {
        // Policy [1,2,3], user submits [2,3,5].
        let policy = policy(&[1, 2, 3]);
        let (enabled, extra) = partition_submission(&policy, &[2, 3, 5]);
        assert_eq!(enabled, set(&[2, 3]));
        assert_eq!(extra, set(&[5]));

        let state = OverrideState {
            active_default: Some(enabled),
            extra,
        };
        let resolution = resolve(true, &policy, Some(&state));
        assert_eq!(resolution.active_default(), ids(&[2, 3]));
        assert_eq!(resolution.limit(), ids(&[1]));
        assert_eq!(resolution.extra(), ids(&[5]));
        assert_eq!(resolution.accessible(), ids(&[2, 3, 5]));
        resolution.verify_invariants(&policy).unwrap();
    }

    #[test]
    fn test_empty_active_default_is_a_restriction() {
        let policy = policy(&[1, 2]);
        let state = OverrideState {
            active_default: Some(BTreeSet::new()),
            extra: set(&[5]),
        };
        let resolution = resolve(true, &policy, Some(&state));
        assert!(resolution.active_default().is_empty());
        assert_eq!(resolution.limit(), ids(&[1, 2]));
        assert_eq!(resolution.accessible(), ids(&[5]));
    }

    #[test]
    fn test_policy_shrink_drops_active_entries() {
        // Declared active set references an id the policy no longer
        // grants; it falls away instead of leaking through.
        let shrunk = policy(&[2]);
        let state = OverrideState {
            active_default: Some(set(&[1, 2])),
            extra: BTreeSet::new(),
        };
        let resolution = resolve(true, &shrunk, Some(&state));
        assert_eq!(resolution.accessible(), ids(&[2]));
        resolution.verify_invariants(&shrunk).unwrap();
    }

    #[test]
    fn test_policy_growth_absorbs_extra() {
        // An extra grant that the policy later absorbs stops counting as
        // extra; the union stays correct either way.
        let grown = policy(&[1, 2, 5]);
        let state = OverrideState {
            active_default: Some(set(&[1, 2])),
            extra: set(&[5]),
        };
        let resolution = resolve(true, &grown, Some(&state));
        assert!(resolution.extra().is_empty());
        assert_eq!(resolution.limit(), ids(&[5]));
        assert_eq!(resolution.accessible(), ids(&[1, 2]));
        resolution.verify_invariants(&grown).unwrap();
    }

    #[test]
    fn test_empty_policy_keeps_extras() {
        let empty = DepartmentPolicy::default();
        let state = OverrideState {
            active_default: Some(BTreeSet::new()),
            extra: set(&[8, 6]),
        };
        let resolution = resolve(true, &empty, Some(&state));
        assert_eq!(resolution.accessible(), ids(&[6, 8]));
        assert!(resolution.limit().is_empty());
    }

    #[test]
    fn test_accessible_is_set_union_not_multiset() {
        let policy = policy(&[1, 2]);
        let state = OverrideState {
            active_default: Some(set(&[1, 2])),
            extra: set(&[1, 5]),
        };
        let resolution = resolve(true, &policy, Some(&state));
        // Id 1 appears once even though it was declared twice.
        assert_eq!(resolution.accessible(), ids(&[1, 2, 5]));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let policy = policy(&[3, 1, 2]);
        let state = OverrideState {
            active_default: Some(set(&[2, 3])),
            extra: set(&[9, 5]),
        };
        let first = resolve(true, &policy, Some(&state));
        let second = resolve(true, &policy, Some(&state));
        assert_eq!(first, second);
        assert_eq!(first.extra(), ids(&[5, 9]));
    }

    #[test]
    fn test_verify_invariants_catches_overlap() {
        let policy = policy(&[1, 2]);
        let broken = Resolution {
            accessible: ids(&[1, 2]),
            active_default: ids(&[1]),
            limit: ids(&[2]),
            extra: ids(&[2]),
        };
        assert_eq!(
            broken.verify_invariants(&policy),
            Err(InvariantViolation::ExtraOverlapsPolicy { id: AppId(2) })
        );
    }
}
