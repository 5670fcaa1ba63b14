//! End-to-end resolution behavior over a real on-disk database.
//!
//! Covers the load-bearing properties of the engine:
//!
//! 1. A privileged grant partitions the submitted set against the
//!    department policy (enabled subset / extra grants / revoked rest).
//! 2. Code-based and id-based policy expressions resolve identically.
//! 3. Unprivileged users inherit the full department policy, stale
//!    override rows notwithstanding, and no row is created for them.
//! 4. Toggling privilege off deletes the override row and restores pure
//!    inheritance.
//! 5. Policy entries that no longer exist in the directory are dropped
//!    silently and never reach an accessible set.

use std::sync::Arc;

use atrium_core::directory::{AppId, AppStatus, Application};
use atrium_daemon::{
    AccessService, ChannelAuditSink, DepartmentStore, NoopAuditSink, OverrideStore,
    SqliteDirectory, StoreHandle, SyncOutcome, UserId, UserStore,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    handle: StoreHandle,
    service: AccessService,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let handle = StoreHandle::open(
        &dir.path().join("portal.db"),
        atrium_daemon::DEFAULT_BUSY_TIMEOUT,
    )
    .unwrap();

    let directory = SqliteDirectory::new(handle.clone());
    for (id, code) in [(1, "APP_A"), (2, "APP_B"), (3, "APP_C"), (5, "APP_E")] {
        directory
            .insert_application(&Application {
                id: AppId(id),
                code: code.to_string(),
                name: code.to_string(),
                status: AppStatus::Active,
            })
            .unwrap();
    }

    let service = AccessService::new(handle.clone(), Arc::new(NoopAuditSink));
    Fixture {
        _dir: dir,
        handle,
        service,
    }
}

fn ids(raw: &[i64]) -> Vec<AppId> {
    raw.iter().copied().map(AppId).collect()
}

#[test]
fn privileged_grant_partitions_submission() {
    // Department policy [1,2,3]; the user submits [2,3,5].
    let fx = fixture();
    DepartmentStore::new(fx.handle.clone())
        .insert_department("sales", Some("[1,2,3]"))
        .unwrap();
    fx.service.create_user(UserId(10), "sales").unwrap();

    fx.service.set_privilege(UserId(10), true, &[2, 3, 5]).unwrap();

    let resolution = fx.service.effective_access(UserId(10)).unwrap();
    assert_eq!(resolution.active_default(), ids(&[2, 3]));
    assert_eq!(resolution.limit(), ids(&[1]));
    assert_eq!(resolution.extra(), ids(&[5]));
    assert_eq!(resolution.accessible(), ids(&[2, 3, 5]));

    // The persisted cache matches the recomputation.
    let row = OverrideStore::new(fx.handle.clone())
        .row(UserId(10))
        .unwrap()
        .unwrap();
    assert_eq!(row.accessible_ids, ids(&[2, 3, 5]));
    assert_eq!(row.limit_ids, ids(&[1]));
    assert_eq!(row.accessible_count, 3);
    assert_eq!(row.accessible_codes, vec!["APP_B", "APP_C", "APP_E"]);
}

#[test]
fn code_expression_resolves_to_ids() {
    // Department policy stored as a comma-separated code list.
    let fx = fixture();
    DepartmentStore::new(fx.handle.clone())
        .insert_department("support", Some("APP_A,APP_B"))
        .unwrap();
    fx.service.create_user(UserId(20), "support").unwrap();

    let resolution = fx.service.effective_access(UserId(20)).unwrap();
    assert_eq!(resolution.accessible(), ids(&[1, 2]));
}

#[test]
fn unprivileged_user_inherits_and_creates_no_row() {
    let fx = fixture();
    DepartmentStore::new(fx.handle.clone())
        .insert_department("sales", Some("[1,2,3]"))
        .unwrap();
    fx.service.create_user(UserId(30), "sales").unwrap();

    let resolution = fx.service.effective_access(UserId(30)).unwrap();
    assert_eq!(resolution.accessible(), ids(&[1, 2, 3]));
    assert!(resolution.limit().is_empty());

    assert!(OverrideStore::new(fx.handle.clone())
        .row(UserId(30))
        .unwrap()
        .is_none());
}

#[test]
fn privilege_toggle_lifecycle_leaves_no_residue() {
    // false -> true -> false: the override row must die with the flag.
    let fx = fixture();
    DepartmentStore::new(fx.handle.clone())
        .insert_department("sales", Some("[1,2,3]"))
        .unwrap();
    fx.service.create_user(UserId(40), "sales").unwrap();

    fx.service.set_privilege(UserId(40), true, &[2]).unwrap();
    assert_eq!(
        fx.service.effective_access(UserId(40)).unwrap().accessible(),
        ids(&[2])
    );

    fx.service.set_privilege(UserId(40), false, &[]).unwrap();
    assert!(OverrideStore::new(fx.handle.clone())
        .row(UserId(40))
        .unwrap()
        .is_none());
    assert!(!UserStore::new(fx.handle.clone()).get(UserId(40)).unwrap().privileged);
    assert_eq!(
        fx.service.effective_access(UserId(40)).unwrap().accessible(),
        ids(&[1, 2, 3])
    );
}

#[test]
fn deleted_directory_entry_never_resolves() {
    // Policy references id 99, which the directory does not know.
    let fx = fixture();
    DepartmentStore::new(fx.handle.clone())
        .insert_department("sales", Some("[1,99,2]"))
        .unwrap();
    fx.service.create_user(UserId(50), "sales").unwrap();

    let resolution = fx.service.effective_access(UserId(50)).unwrap();
    assert_eq!(resolution.accessible(), ids(&[1, 2]));
    assert!(!resolution.accessible().contains(&AppId(99)));

    // Same through the privileged path.
    fx.service.set_privilege(UserId(50), true, &[1, 99]).unwrap();
    let resolution = fx.service.effective_access(UserId(50)).unwrap();
    assert!(!resolution.accessible().contains(&AppId(99)));
}

#[test]
fn stale_override_row_is_ignored_and_repaired() {
    let fx = fixture();
    DepartmentStore::new(fx.handle.clone())
        .insert_department("sales", Some("[1,2,3]"))
        .unwrap();
    fx.service.create_user(UserId(60), "sales").unwrap();
    fx.service.set_privilege(UserId(60), true, &[2]).unwrap();

    // Flip the flag off behind the engine's back, leaving the row behind.
    UserStore::new(fx.handle.clone())
        .set_privilege_flag(UserId(60), false)
        .unwrap();

    // Reads ignore the stale row entirely.
    assert_eq!(
        fx.service.effective_access(UserId(60)).unwrap().accessible(),
        ids(&[1, 2, 3])
    );

    // A sync repairs the drift by deleting it.
    assert_eq!(
        fx.service.resync_user(UserId(60)).unwrap(),
        SyncOutcome::StaleOverrideRemoved
    );
    assert!(OverrideStore::new(fx.handle.clone())
        .row(UserId(60))
        .unwrap()
        .is_none());
}

#[test]
fn sync_is_idempotent_byte_for_byte() {
    let fx = fixture();
    DepartmentStore::new(fx.handle.clone())
        .insert_department("sales", Some("[1,2,3]"))
        .unwrap();
    fx.service.create_user(UserId(70), "sales").unwrap();
    fx.service.set_privilege(UserId(70), true, &[2, 5]).unwrap();

    let store = OverrideStore::new(fx.handle.clone());
    let first = store.row(UserId(70)).unwrap().unwrap();

    assert_eq!(fx.service.resync_user(UserId(70)).unwrap(), SyncOutcome::Unchanged);
    assert_eq!(fx.service.resync_user(UserId(70)).unwrap(), SyncOutcome::Unchanged);

    let after = store.row(UserId(70)).unwrap().unwrap();
    assert_eq!(first, after);
}

#[test]
fn second_enable_replaces_prior_grant() {
    let fx = fixture();
    DepartmentStore::new(fx.handle.clone())
        .insert_department("sales", Some("[1,2,3]"))
        .unwrap();
    fx.service.create_user(UserId(80), "sales").unwrap();

    fx.service.set_privilege(UserId(80), true, &[1, 5]).unwrap();
    fx.service.set_privilege(UserId(80), true, &[2]).unwrap();

    let resolution = fx.service.effective_access(UserId(80)).unwrap();
    // No merge with the first grant: 1 and 5 are gone.
    assert_eq!(resolution.accessible(), ids(&[2]));
    assert_eq!(resolution.limit(), ids(&[1, 3]));
}

#[test]
fn department_reassignment_resyncs_against_new_policy() {
    let fx = fixture();
    let departments = DepartmentStore::new(fx.handle.clone());
    departments.insert_department("sales", Some("[1,2,3]")).unwrap();
    departments.insert_department("support", Some("[2]")).unwrap();

    fx.service.create_user(UserId(90), "sales").unwrap();
    fx.service.set_privilege(UserId(90), true, &[2, 3, 5]).unwrap();

    fx.service.reassign_department(UserId(90), "support").unwrap();

    let resolution = fx.service.effective_access(UserId(90)).unwrap();
    // Active default shrinks to the new policy; the out-of-policy grant
    // survives as extra.
    assert_eq!(resolution.active_default(), ids(&[2]));
    assert_eq!(resolution.extra(), ids(&[3, 5]));
    assert_eq!(resolution.accessible(), ids(&[2, 3, 5]));

    let row = OverrideStore::new(fx.handle.clone())
        .row(UserId(90))
        .unwrap()
        .unwrap();
    assert_eq!(row.accessible_ids, ids(&[2, 3, 5]));
}

#[test]
fn missing_department_resolves_empty_not_error() {
    let fx = fixture();
    fx.service.create_user(UserId(100), "nonexistent").unwrap();

    let resolution = fx.service.effective_access(UserId(100)).unwrap();
    assert!(resolution.accessible().is_empty());
}

#[test]
fn missing_user_is_not_found() {
    let fx = fixture();
    let err = fx.service.effective_access(UserId(404)).unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_retryable());
}

#[test]
fn privilege_change_notifies_audit_sink() {
    let dir = TempDir::new().unwrap();
    let handle = StoreHandle::open(
        &dir.path().join("portal.db"),
        atrium_daemon::DEFAULT_BUSY_TIMEOUT,
    )
    .unwrap();
    let directory = SqliteDirectory::new(handle.clone());
    directory
        .insert_application(&Application {
            id: AppId(1),
            code: "APP_A".to_string(),
            name: "APP_A".to_string(),
            status: AppStatus::Active,
        })
        .unwrap();
    DepartmentStore::new(handle.clone())
        .insert_department("sales", Some("[1]"))
        .unwrap();

    let (sink, received) = ChannelAuditSink::pair();
    let service = AccessService::new(handle, Arc::new(sink));
    service.create_user(UserId(1), "sales").unwrap();

    service.set_privilege(UserId(1), true, &[1]).unwrap();
    let enabled = received.recv().unwrap();
    assert!(enabled.contains("privilege enabled for user 1"));
    assert!(enabled.contains("accessible=[1]"));

    service.set_privilege(UserId(1), false, &[]).unwrap();
    let disabled = received.recv().unwrap();
    assert!(disabled.contains("privilege disabled for user 1"));
}
