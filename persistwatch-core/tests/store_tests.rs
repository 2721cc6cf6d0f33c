//! Store error-message, atomic-write-safety and listing integration tests.
//! Layout: ~/.persistwatch/{snapshots,records}/<id>.json, pending.json, baseline.json

use std::fs;

use assert_fs::prelude::*;
use persistwatch_core::{
    types::{Diff, DiffSource, Item, PendingDiffPair, Snapshot},
    Location, Store, StoreError,
};
use predicates::prelude::predicate;

fn snapshot(label: &str, digest: &str) -> Snapshot {
    Snapshot::capture(
        label,
        vec![Item::new(
            "/Users/tester/Library/LaunchAgents/com.example.plist",
            Location::UserLaunchAgents,
            digest,
        )],
    )
}

fn diff_between(before: &Snapshot, after: &Snapshot) -> Diff {
    Diff {
        before_id: before.id,
        after_id: after.id,
        before_captured_at: before.captured_at,
        after_captured_at: after.captured_at,
        added: vec![],
        removed: vec![],
        modified: vec![],
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn corrupt_snapshot_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = Store::at(home.path());
    let snap = snapshot("ok", "aa");
    store.save_snapshot(&snap).expect("save");
    fs::write(store.snapshot_path(snap.id), b"{ not json").expect("corrupt");

    let err = store.load_snapshot(snap.id).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains(&snap.id.to_string()));
}

#[test]
fn corrupt_entries_are_skipped_when_listing() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = Store::at(home.path());
    store.save_snapshot(&snapshot("good", "aa")).expect("save");
    home.child(".persistwatch/snapshots/garbage.json")
        .write_str("[1, 2")
        .expect("write garbage");

    let listed = store.list_snapshots().expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].label, "good");
}

#[test]
fn listing_empty_store_is_empty() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = Store::at(home.path());
    assert!(store.list_snapshots().expect("list").is_empty());
    assert!(store.list_records().expect("list").is_empty());
    assert!(store.latest_snapshot().expect("latest").is_none());
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_leaves_no_tmp_files_behind() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = Store::at(home.path());
    let before = snapshot("before", "aa");
    let after = snapshot("after", "bb");
    store.save_snapshot(&before).expect("save");
    store.save_baseline(&after).expect("baseline");
    store
        .save_record(&diff_between(&before, &after).to_record(DiffSource::Manual))
        .expect("record");
    store
        .save_pending(&PendingDiffPair::new(before.id, after.id))
        .expect("pending");

    for entry in walk(home.path()) {
        assert!(
            !entry.to_string_lossy().ends_with(".tmp"),
            "leftover tmp file: {}",
            entry.display()
        );
    }
    home.child(".persistwatch/pending.json")
        .assert(predicate::path::exists());
    home.child(".persistwatch/baseline.json")
        .assert(predicate::str::contains(after.id.to_string()));
}

#[test]
fn delete_snapshot_removes_file_and_reports_missing_second_time() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = Store::at(home.path());
    let snap = snapshot("gone", "aa");
    store.save_snapshot(&snap).expect("save");
    store.delete_snapshot(snap.id).expect("delete");
    home.child(format!(".persistwatch/snapshots/{}.json", snap.id))
        .assert(predicate::path::missing());

    let err = store.delete_snapshot(snap.id).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

// ---------------------------------------------------------------------------
// 3. Listing and backward compatibility
// ---------------------------------------------------------------------------

#[test]
fn latest_snapshot_is_most_recent_capture() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = Store::at(home.path());
    let first = snapshot("first", "aa");
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = snapshot("second", "bb");
    store.save_snapshot(&second).expect("save");
    store.save_snapshot(&first).expect("save");

    let latest = store.latest_snapshot().expect("latest").expect("some");
    assert_eq!(latest.id, second.id);
}

#[test]
fn legacy_record_on_disk_loads_with_untracked_locations() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = Store::at(home.path());
    let id = "6f1c1f5e-8a53-4bde-9d43-0c4b8d3f2d10";
    home.child(format!(".persistwatch/records/{id}.json"))
        .write_str(
            r#"{
                "id": "6f1c1f5e-8a53-4bde-9d43-0c4b8d3f2d10",
                "before_snapshot_id": "0b8e0f26-2a7a-4f0c-9d7f-5a0f0d7c2e11",
                "after_snapshot_id": "9c7a5c1e-1f0b-4d5e-8a2b-3c4d5e6f7a80",
                "timestamp": "2023-11-02T08:30:00Z",
                "added_count": 2,
                "removed_count": 1,
                "modified_count": 0,
                "source": "manual"
            }"#,
        )
        .expect("write legacy record");

    let records = store.list_records().expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].affected_locations, None);
    assert_eq!(records[0].total_changes(), 3);
}

fn walk(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).expect("read_dir").flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
