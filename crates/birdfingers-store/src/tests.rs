use super::*;
use birdfingers_core::{EnvironmentCapture, Error, Result};
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TEST_DATA_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_layout() -> DataLayout {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_DATA_DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "birdfingers-store-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    DataLayout::new(path)
}

fn at(hour: u32, minute: u32, second: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, hour, minute, second)
        .single()
        .expect("valid timestamp")
}

struct FixedCapture {
    text: &'static str,
}

impl EnvironmentCapture for FixedCapture {
    fn freeze(&self) -> Result<String> {
        Ok(self.text.to_string())
    }

    fn interpreter(&self) -> Option<String> {
        Some("/usr/bin/python3".to_string())
    }
}

struct BrokenCapture;

impl EnvironmentCapture for BrokenCapture {
    fn freeze(&self) -> Result<String> {
        Err(Error::upstream("pip", "python3 not found"))
    }
}

#[test]
fn layout_paths_live_under_data_dir() {
    let layout = DataLayout::new("/data");
    assert_eq!(
        layout.snapshots_dir(),
        PathBuf::from("/data/birdfingers_snapshots")
    );
    assert_eq!(
        layout.snapshot_meta_path("env_20240517_101500"),
        PathBuf::from("/data/birdfingers_snapshots/env_20240517_101500.json")
    );
    assert_eq!(
        layout.snapshot_payload_path("env_20240517_101500"),
        PathBuf::from("/data/birdfingers_snapshots/env_20240517_101500.txt")
    );
    assert_eq!(layout.audit_path(), PathBuf::from("/data/birdfingers_audit.jsonl"));
}

#[test]
fn safe_name_collapses_unsafe_runs() {
    assert_eq!(safe_snapshot_name("before upgrade!!"), "before_upgrade_");
    assert_eq!(safe_snapshot_name("  "), "snapshot");
    assert_eq!(safe_snapshot_name("../../etc"), ".._.._etc");
    assert_eq!(safe_snapshot_name(&"x".repeat(90)).len(), 60);
}

#[test]
fn snapshot_id_validation_rejects_paths() {
    assert!(is_valid_snapshot_id("env_20240517_101500"));
    assert!(!is_valid_snapshot_id("../env"));
    assert!(!is_valid_snapshot_id(".."));
    assert!(!is_valid_snapshot_id(""));
}

#[test]
fn save_writes_payload_and_metadata() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let meta = store
        .save_payload(
            "before upgrade",
            "pre-release",
            "a==1.0\nb==2.0\n-e ./local\n",
            Some("/usr/bin/python3".to_string()),
            at(10, 15, 0),
        )
        .expect("must save snapshot");

    assert_eq!(meta.id, "before_upgrade_20240517_101500");
    assert_eq!(meta.name, "before upgrade");
    assert_eq!(meta.created_utc, "20240517_101500");
    assert_eq!(meta.count, 2);
    assert_eq!(meta.requirements, "before_upgrade_20240517_101500.txt");

    let payload = fs::read_to_string(layout.snapshot_payload_path(&meta.id))
        .expect("must read payload");
    assert_eq!(payload, "a==1.0\nb==2.0\n-e ./local\n");
    let raw_meta =
        fs::read_to_string(layout.snapshot_meta_path(&meta.id)).expect("must read meta");
    assert!(raw_meta.contains("\"comment\": \"pre-release\""));

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn save_captures_current_environment() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let meta = store
        .save(&FixedCapture { text: "x==1\n" }, "env", "")
        .expect("must save");
    assert_eq!(meta.python.as_deref(), Some("/usr/bin/python3"));

    let stored = store.require(&meta.id).expect("must load");
    assert_eq!(stored.package_set().get("x").expect("x pinned").version, "1");

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn save_propagates_capture_failure_without_writing() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let err = store
        .save(&BrokenCapture, "env", "")
        .expect_err("capture failure must surface");
    assert!(matches!(err, Error::UpstreamUnavailable { .. }));
    assert!(store.list().expect("must list").is_empty());

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn same_second_same_name_snapshots_get_distinct_ids() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let first = store
        .save_payload("env", "", "a==1.0\n", None, at(9, 0, 0))
        .expect("must save first");
    let second = store
        .save_payload("env", "", "a==2.0\n", None, at(9, 0, 0))
        .expect("must save second");
    let third = store
        .save_payload("env", "", "a==2.0\n", None, at(9, 0, 0))
        .expect("must save third");

    assert_eq!(first.id, "env_20240517_090000");
    assert_ne!(first.id, second.id);
    assert!(second.id.starts_with("env_20240517_090000_"));
    assert_ne!(second.id, third.id);

    let first_loaded = store.require(&first.id).expect("first must load");
    let second_loaded = store.require(&second.id).expect("second must load");
    assert_eq!(first_loaded.payload, "a==1.0\n");
    assert_eq!(second_loaded.payload, "a==2.0\n");
    assert_eq!(store.list().expect("must list").len(), 3);

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn list_orders_newest_first() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    store
        .save_payload("old", "", "a==1\n", None, at(8, 0, 0))
        .expect("must save old");
    store
        .save_payload("new", "", "a==2\n", None, at(12, 0, 0))
        .expect("must save new");
    store
        .save_payload("mid", "", "a==3\n", None, at(10, 0, 0))
        .expect("must save mid");

    let names = store
        .list()
        .expect("must list")
        .into_iter()
        .map(|meta| meta.name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["new", "mid", "old"]);

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn list_orders_same_second_claims_newest_first() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let saved = (0..12)
        .map(|_| {
            store
                .save_payload("env", "", "a==1\n", None, at(9, 0, 0))
                .expect("must save")
                .id
        })
        .collect::<Vec<_>>();
    assert!(saved[9].ends_with("-9"));
    assert!(saved[10].ends_with("-10"));

    let listed = store
        .list()
        .expect("must list")
        .into_iter()
        .map(|meta| meta.id)
        .collect::<Vec<_>>();
    let newest_first = saved.into_iter().rev().collect::<Vec<_>>();
    assert_eq!(listed, newest_first);

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn list_on_missing_directory_is_empty() {
    let store = SnapshotStore::new(test_layout());
    assert!(store.list().expect("must list").is_empty());
}

#[test]
fn corrupt_and_orphaned_records_are_hidden() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let kept = store
        .save_payload("kept", "", "a==1\n", None, at(8, 0, 0))
        .expect("must save");
    let orphan = store
        .save_payload("orphan", "", "a==1\n", None, at(9, 0, 0))
        .expect("must save");
    fs::remove_file(layout.snapshot_payload_path(&orphan.id)).expect("must remove payload");
    fs::write(layout.snapshots_dir().join("garbage.json"), "{not json")
        .expect("must write garbage");
    fs::write(layout.snapshots_dir().join("garbage.txt"), "a==1\n").expect("must write payload");

    let listed = store.list().expect("listing must not fail");
    assert_eq!(listed, vec![kept]);
    assert!(store.get(&orphan.id).expect("must not error").is_none());
    let err = store.require(&orphan.id).expect_err("orphan must be not found");
    assert!(err.is_not_found());

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn get_rejects_traversal_ids() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());
    assert!(store.get("../secrets").expect("must not error").is_none());
    assert!(!store.delete("../secrets"));
}

#[test]
fn delete_removes_both_records() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let meta = store
        .save_payload("env", "", "a==1\n", None, at(8, 0, 0))
        .expect("must save");
    assert!(store.delete(&meta.id));
    assert!(!layout.snapshot_meta_path(&meta.id).exists());
    assert!(!layout.snapshot_payload_path(&meta.id).exists());
    assert!(store.get(&meta.id).expect("must not error").is_none());

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn delete_cleans_up_half_written_snapshot() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let meta = store
        .save_payload("env", "", "a==1\n", None, at(8, 0, 0))
        .expect("must save");
    fs::remove_file(layout.snapshot_meta_path(&meta.id)).expect("must remove meta");

    assert!(store.delete(&meta.id));
    assert!(!layout.snapshot_payload_path(&meta.id).exists());

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn has_records_sees_either_half() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let meta = store
        .save_payload("env", "", "a==1\n", None, at(8, 0, 0))
        .expect("must save");
    assert!(store.has_records(&meta.id));

    fs::remove_file(layout.snapshot_payload_path(&meta.id)).expect("must remove payload");
    assert!(store.has_records(&meta.id));
    assert!(store.get(&meta.id).expect("must not error").is_none());

    assert!(store.delete(&meta.id));
    assert!(!store.has_records(&meta.id));
    assert!(!store.has_records("../secrets"));

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[cfg(unix)]
#[test]
fn delete_reports_partial_failure_but_attempts_both() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());

    let meta = store
        .save_payload("env", "", "a==1\n", None, at(8, 0, 0))
        .expect("must save");
    let meta_path = layout.snapshot_meta_path(&meta.id);
    fs::remove_file(&meta_path).expect("must remove meta");
    fs::create_dir(&meta_path).expect("must replace meta with a directory");

    assert!(!store.delete(&meta.id));
    assert!(!layout.snapshot_payload_path(&meta.id).exists());

    let _ = fs::remove_dir_all(layout.data_dir());
}

#[test]
fn audit_log_appends_json_lines() {
    let layout = test_layout();
    let audit = AuditLog::new(layout.audit_path());

    let mut details = BTreeMap::new();
    details.insert("package".to_string(), "requests".to_string());
    details.insert("to_version".to_string(), "2.31.0".to_string());
    let record = AuditRecord {
        timestamp: "2024-05-17T10:15:00Z".to_string(),
        action: "install-exact".to_string(),
        status: "success".to_string(),
        details,
        exit_code: Some(0),
        output: "Successfully installed requests-2.31.0\n".to_string(),
    };
    audit.append(&record).expect("must append");
    audit
        .append(&AuditRecord {
            status: "failure".to_string(),
            exit_code: Some(1),
            ..record.clone()
        })
        .expect("must append second");
    fs::OpenOptions::new()
        .append(true)
        .open(layout.audit_path())
        .and_then(|mut file| std::io::Write::write_all(&mut file, b"not json\n"))
        .expect("must append garbage");

    let raw = fs::read_to_string(layout.audit_path()).expect("must read audit");
    assert_eq!(raw.lines().count(), 3);

    let records = audit.read_all().expect("must read records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], record);
    assert_eq!(records[1].exit_code, Some(1));

    let _ = fs::remove_dir_all(layout.data_dir());
}
