//! Artifact store integration tests against a real temp directory.

use std::collections::BTreeMap;

use cg_state::ArtifactStore;

#[test]
fn store_bytes_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();

    let a = store
        .store_bytes(b"hello world", "text", BTreeMap::new())
        .unwrap();
    let b = store
        .store_bytes(b"hello world", "text", BTreeMap::new())
        .unwrap();

    assert_eq!(a.blob_id, b.blob_id);
    assert_eq!(a.path, b.path);
    assert!(a.path.exists());

    // A single file on disk: the shard directory contains exactly one entry.
    let shard = a.path.parent().unwrap();
    assert_eq!(std::fs::read_dir(shard).unwrap().count(), 1);
}

#[test]
fn round_trip_text_and_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();

    let record = store.store_text("serp results for hamster cages", "serp").unwrap();
    assert!(record.blob_id.starts_with("blob://"));
    assert!(store.exists(&record.blob_id));
    assert_eq!(
        store.read_text(&record.blob_id).unwrap(),
        "serp results for hamster cages"
    );
}

#[test]
fn missing_blob_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    let missing = format!("blob://{}", "ab".repeat(32));
    assert!(store.read_bytes(&missing).is_err());
    assert!(!store.exists(&missing));
}

#[test]
fn long_text_records_preview_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();

    let long = "x".repeat(2000);
    let record = store.store_text(&long, "html").unwrap();
    let preview = record.metadata.get("preview").and_then(|v| v.as_str()).unwrap();
    assert!(preview.ends_with("..."));
    assert!(preview.len() < long.len());
}

#[test]
fn index_jsonl_grows_per_write() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();

    store.store_text("one", "text").unwrap();
    store.store_text("two", "text").unwrap();

    let index = std::fs::read_to_string(dir.path().join("index.jsonl")).unwrap();
    assert_eq!(index.lines().count(), 2);
}
