use tempfile::TempDir;

use pr_keepalive::lock::{OwnerCard, PrLock};

#[test]
fn lock_acquires_and_releases_on_drop() {
    let dir = TempDir::new().unwrap();

    let guard = PrLock::acquire(dir.path(), 606, "update-summary").unwrap();
    assert!(dir.path().join("pr-606.owner.json").exists());
    drop(guard);

    // Card removed and the lock can be re-acquired.
    assert!(!dir.path().join("pr-606.owner.json").exists());
    let _guard = PrLock::acquire(dir.path(), 606, "reconcile").unwrap();
}

#[test]
fn owner_card_records_the_holding_invocation() {
    let dir = TempDir::new().unwrap();

    let _guard = PrLock::acquire(dir.path(), 606, "update-summary").unwrap();
    let raw = std::fs::read_to_string(dir.path().join("pr-606.owner.json")).unwrap();
    let card: OwnerCard = serde_json::from_str(&raw).unwrap();

    assert_eq!(card.pr_number, 606);
    assert_eq!(card.command, "update-summary");
    assert_eq!(card.pid, std::process::id());
    assert!(!card.acquired_at.is_empty());
}

#[test]
fn contention_names_the_live_holder() {
    let dir = TempDir::new().unwrap();

    let _guard = PrLock::acquire(dir.path(), 606, "update-summary").unwrap();
    let err = PrLock::acquire(dir.path(), 606, "reconcile").unwrap_err();

    assert!(err.contains("PR #606"), "err: {}", err);
    assert!(err.contains("update-summary"), "err: {}", err);
    assert!(
        err.contains(&std::process::id().to_string()),
        "err should name the holding PID: {}",
        err
    );
}

#[test]
fn different_prs_lock_independently() {
    let dir = TempDir::new().unwrap();

    let _first = PrLock::acquire(dir.path(), 606, "update-summary").unwrap();
    let _second = PrLock::acquire(dir.path(), 707, "update-summary").unwrap();
}

#[test]
fn runtime_directory_is_created() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("missing/.keepalive");
    let _guard = PrLock::acquire(&nested, 606, "mark-running").unwrap();
    assert!(nested.exists());
}
