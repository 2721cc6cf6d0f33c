use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::{Duration, Utc};
use predicates::str::contains;
use serde_json::Value;

use persistwatch_core::{
    DiffSource, Item, Location, PendingDiffPair, Snapshot, SnapshotId, Store,
};
use persistwatch_scan::diff;
use tempfile::TempDir;

fn persistwatch_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("persistwatch"));
    cmd.env("HOME", home).env("NO_COLOR", "1");
    cmd
}

fn agent_path(home: &Path, name: &str) -> PathBuf {
    home.join("Library/LaunchAgents").join(name)
}

fn snapshot(label: &str, minutes_ago: i64, items: Vec<Item>) -> Snapshot {
    let mut snapshot = Snapshot::capture(label, items);
    snapshot.captured_at = Utc::now() - Duration::minutes(minutes_ago);
    snapshot
}

/// Two stored snapshots: `a` modified and `b` added between them.
fn seed_pair(home: &Path) -> (Snapshot, Snapshot) {
    let store = Store::at(home);
    let a = agent_path(home, "com.example.a.plist");
    let b = agent_path(home, "com.example.b.plist");

    let before = snapshot(
        "before",
        10,
        vec![Item::new(&a, Location::UserLaunchAgents, "aaaa")],
    );
    let after = snapshot(
        "after",
        5,
        vec![
            Item::new(&a, Location::UserLaunchAgents, "bbbb"),
            Item::new(&b, Location::UserLaunchAgents, "cccc"),
        ],
    );
    store.save_snapshot(&before).expect("save before");
    store.save_snapshot(&after).expect("save after");
    (before, after)
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout is JSON")
}

#[test]
fn snapshots_lists_oldest_first_and_show_prints_items() {
    let home = TempDir::new().expect("home");
    let (before, after) = seed_pair(home.path());

    let listed = stdout_json(persistwatch_cmd(home.path()).args(["snapshots", "--json"]));
    let labels: Vec<&str> = listed
        .as_array()
        .expect("array")
        .iter()
        .map(|s| s["label"].as_str().expect("label"))
        .collect();
    assert_eq!(labels, ["before", "after"]);
    assert_eq!(listed[1]["item_count"], 2);

    persistwatch_cmd(home.path())
        .args(["show", &after.id.to_string()])
        .assert()
        .success()
        .stdout(contains("com.example.b.plist"))
        .stdout(contains(after.aggregate_digest.as_str()));

    let shown = stdout_json(persistwatch_cmd(home.path()).args([
        "show",
        &before.id.to_string(),
        "--json",
    ]));
    assert_eq!(shown["items"].as_array().map(Vec::len), Some(1));
}

#[test]
fn show_unknown_snapshot_fails() {
    let home = TempDir::new().expect("home");
    persistwatch_cmd(home.path())
        .args(["show", &SnapshotId::new().to_string()])
        .assert()
        .failure()
        .stderr(contains("failed to load snapshot"));

    persistwatch_cmd(home.path())
        .args(["show", "not-a-uuid"])
        .assert()
        .failure();
}

#[test]
fn diff_defaults_to_latest_two_snapshots() {
    let home = TempDir::new().expect("home");
    let (before, after) = seed_pair(home.path());

    persistwatch_cmd(home.path())
        .arg("diff")
        .assert()
        .success()
        .stdout(contains("1 added, 0 removed, 1 modified"))
        .stdout(contains("com.example.b.plist"));

    persistwatch_cmd(home.path())
        .args(["diff", "--format", "md"])
        .assert()
        .success()
        .stdout(contains("# Persistence changes"));

    let reversed = stdout_json(persistwatch_cmd(home.path()).args([
        "diff",
        &after.id.to_string(),
        &before.id.to_string(),
        "--format",
        "json",
    ]));
    assert_eq!(reversed["added"].as_array().map(Vec::len), Some(0));
    assert_eq!(reversed["removed"].as_array().map(Vec::len), Some(1));
    assert_eq!(reversed["modified"].as_array().map(Vec::len), Some(1));
}

#[test]
fn diff_needs_two_snapshots() {
    let home = TempDir::new().expect("home");
    Store::at(home.path())
        .save_snapshot(&snapshot("only", 1, Vec::new()))
        .expect("save");

    persistwatch_cmd(home.path())
        .arg("diff")
        .assert()
        .failure()
        .stderr(contains("need at least two snapshots"));
}

#[test]
fn pending_shows_and_acknowledges_detected_change() {
    let home = TempDir::new().expect("home");
    let (before, after) = seed_pair(home.path());
    let store = Store::at(home.path());

    persistwatch_cmd(home.path())
        .arg("pending")
        .assert()
        .success()
        .stdout(contains("No pending changes."));

    store
        .save_pending(&PendingDiffPair::new(before.id, after.id))
        .expect("save pending");

    persistwatch_cmd(home.path())
        .args(["pending", "--ack"])
        .assert()
        .success()
        .stdout(contains("1 added"))
        .stdout(contains("Pending change acknowledged."));

    assert!(store.load_pending().expect("load pending").is_none());
    persistwatch_cmd(home.path())
        .args(["pending", "--format", "json"])
        .assert()
        .success()
        .stdout(contains("null"));
}

#[test]
fn deleting_a_pending_snapshot_clears_the_pending_change() {
    let home = TempDir::new().expect("home");
    let (before, after) = seed_pair(home.path());
    let store = Store::at(home.path());
    store
        .save_pending(&PendingDiffPair::new(before.id, after.id))
        .expect("save pending");

    persistwatch_cmd(home.path())
        .args(["delete", &before.id.to_string()])
        .assert()
        .success()
        .stdout(contains("Cleared the pending change"));
    assert!(store.load_pending().expect("load pending").is_none());

    persistwatch_cmd(home.path())
        .arg("pending")
        .assert()
        .success()
        .stdout(contains("No pending changes."));
}

#[test]
fn ack_discards_pending_change_with_missing_snapshot() {
    let home = TempDir::new().expect("home");
    let (before, after) = seed_pair(home.path());
    let store = Store::at(home.path());
    store
        .save_pending(&PendingDiffPair::new(before.id, after.id))
        .expect("save pending");
    store.delete_snapshot(before.id).expect("delete before");

    persistwatch_cmd(home.path())
        .arg("pending")
        .assert()
        .failure()
        .stderr(contains("pending --ack"));

    persistwatch_cmd(home.path())
        .args(["pending", "--ack"])
        .assert()
        .success()
        .stderr(contains("can no longer be shown"))
        .stdout(contains("Pending change acknowledged."));
    assert!(store.load_pending().expect("load pending").is_none());
}

#[test]
fn history_lists_records_newest_first() {
    let home = TempDir::new().expect("home");
    let (before, after) = seed_pair(home.path());
    let store = Store::at(home.path());

    let mut older = diff(&before, &after).to_record(DiffSource::Manual);
    older.timestamp = Utc::now() - Duration::hours(2);
    store.save_record(&older).expect("save older");
    let newer = diff(&after, &before).to_record(DiffSource::Automatic);
    store.save_record(&newer).expect("save newer");

    let records = stdout_json(persistwatch_cmd(home.path()).args(["history", "--json"]));
    let sources: Vec<&str> = records
        .as_array()
        .expect("array")
        .iter()
        .map(|r| r["source"].as_str().expect("source"))
        .collect();
    assert_eq!(sources, ["automatic", "manual"]);

    let limited = stdout_json(persistwatch_cmd(home.path()).args(["history", "-n", "1", "--json"]));
    assert_eq!(limited.as_array().map(Vec::len), Some(1));

    persistwatch_cmd(home.path())
        .arg("history")
        .assert()
        .success()
        .stdout(contains("2h ago"));
}

#[test]
fn delete_removes_snapshot_once() {
    let home = TempDir::new().expect("home");
    let (before, _) = seed_pair(home.path());
    let id = before.id.to_string();

    persistwatch_cmd(home.path())
        .args(["delete", &id])
        .assert()
        .success()
        .stdout(contains("Deleted snapshot"));
    persistwatch_cmd(home.path())
        .args(["delete", &id])
        .assert()
        .failure();

    let listed = stdout_json(persistwatch_cmd(home.path()).args(["snapshots", "--json"]));
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}

#[test]
fn deleting_the_baseline_is_reported() {
    let home = TempDir::new().expect("home");
    let baseline = snapshot("watch", 1, Vec::new());
    Store::at(home.path())
        .save_baseline(&baseline)
        .expect("save baseline");

    persistwatch_cmd(home.path())
        .args(["delete", &baseline.id.to_string()])
        .assert()
        .success()
        .stdout(contains("That was the baseline"));
    assert!(Store::at(home.path())
        .load_baseline()
        .expect("load baseline")
        .is_none());
}
