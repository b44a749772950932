//! Instance lock tokens across worker lifecycles
//!
//! Tokens are advisory: they let an operator see which instance slots are running and
//! surface a crashed predecessor, but they never stop a worker from starting.

use std::fs;
use std::sync::Arc;

use docharvest_core::{Coordinator, FileCoordinator, LockGuard, LockToken, MemoryCoordinator};
use tempfile::tempdir;

#[test]
fn instances_hold_independent_tokens_in_a_shared_directory() {
    let temp = tempdir().expect("tempdir");
    let coordinator = Arc::new(FileCoordinator::new(temp.path().join("locks")));

    let first = LockGuard::acquire(coordinator.clone(), 1);
    let second = LockGuard::acquire(coordinator.clone(), 2);

    assert!(coordinator.lock_path(1).exists());
    assert!(coordinator.lock_path(2).exists());
    assert_eq!(first.token().map(|token| token.instance_index), Some(1));
    assert_eq!(second.token().map(|token| token.instance_index), Some(2));

    drop(first);
    assert!(!coordinator.lock_path(1).exists());
    assert!(coordinator.lock_path(2).exists());
}

#[test]
fn a_restarted_worker_takes_over_the_slot_of_a_crashed_one() {
    // Given: a worker that died without releasing its token
    let temp = tempdir().expect("tempdir");
    let coordinator = Arc::new(FileCoordinator::new(temp.path()));
    let crashed = LockGuard::acquire(coordinator.clone(), 3);
    let crashed_token = crashed.token().cloned().expect("token");
    std::mem::forget(crashed);

    // When: the replacement starts on the same slot
    let acquisition = coordinator.acquire(3).expect("acquire");

    // Then: the previous holder is reported and the slot now belongs to the new worker
    let previous = acquisition.previous.expect("previous holder reported");
    assert_eq!(previous.holder, Some(crashed_token));

    let on_disk: LockToken =
        serde_json::from_str(&fs::read_to_string(coordinator.lock_path(3)).expect("read"))
            .expect("token json");
    assert_eq!(on_disk, acquisition.token);
}

#[test]
fn an_unwritable_lock_directory_does_not_stop_the_worker() {
    let temp = tempdir().expect("tempdir");
    let blocker = temp.path().join("not-a-dir");
    fs::write(&blocker, "file in the way").expect("write");

    let guard = LockGuard::acquire(Arc::new(FileCoordinator::new(blocker.join("locks"))), 1);

    assert!(guard.token().is_none());
}

#[test]
fn memory_coordinator_reports_planted_tokens_like_files_do() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let stale = LockToken::for_current_process(4);
    coordinator.plant(stale.clone());

    let acquisition = coordinator.acquire(4).expect("acquire");
    assert_eq!(
        acquisition.previous.and_then(|previous| previous.holder),
        Some(stale)
    );

    coordinator.release(&acquisition.token).expect("release");
    assert!(coordinator.holder(4).is_none());
}
