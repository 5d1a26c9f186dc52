//! Cache Coherence Tests
//!
//! Two stores open on one medium (shared memory or the same file) must see
//! each other's commits in their next transaction, even when typed objects
//! are held in the revision-stamped snapshot cache.

use koya_core::{KoyaResult, ObjectRef, Value};
use koya_engine::{Fields, Persistent, Store, StoreConfig};
use koya_storage::{MemoryBackend, MemoryMedium};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
struct Note {
    text: String,
}

impl Persistent for Note {
    const CLASS: &'static str = "note";

    fn extract_fields(&self) -> Fields {
        Fields::new().with("text", self.text.as_str())
    }

    fn materialize(_: &ObjectRef, fields: &Fields) -> KoyaResult<Self> {
        Ok(Self {
            text: fields.get_as("text")?,
        })
    }
}

fn memory_pair() -> (Arc<Store>, Arc<Store>) {
    let medium = MemoryMedium::new();
    let open = || {
        Store::builder()
            .backend(MemoryBackend::with_medium(medium.clone()))
            .register::<Note>()
            .open()
            .unwrap()
    };
    (open(), open())
}

fn file_store(dir: &TempDir) -> Arc<Store> {
    Store::builder()
        .path(dir.path())
        .register::<Note>()
        .open()
        .unwrap()
}

#[test]
fn test_second_store_sees_root_writes() {
    let (a, b) = memory_pair();
    assert_eq!(a.root().rowid, b.root().rowid);
    a.set("shared", 1).unwrap();
    assert_eq!(b.get("shared").unwrap(), Some(Value::Int(1)));
    b.set("shared", 2).unwrap();
    assert_eq!(a.get("shared").unwrap(), Some(Value::Int(2)));
}

#[test]
fn test_snapshot_cache_invalidated_by_foreign_commit() {
    let (a, b) = memory_pair();
    let note = a.create(Note { text: "first".into() }).unwrap();
    a.set("note", note.reference()).unwrap();

    // Warm a's snapshot cache
    assert_eq!(note.get().unwrap().text, "first");

    let reference = b
        .get_as::<ObjectRef>("note")
        .unwrap()
        .expect("note reference");
    let remote = b.handle::<Note>(reference).unwrap();
    remote.update(|n| n.text = "second".into()).unwrap();

    assert_eq!(note.get().unwrap().text, "second");
}

#[test]
fn test_references_are_rebound_to_reading_store() {
    let (a, b) = memory_pair();
    let note = a.create(Note { text: "x".into() }).unwrap();
    a.set("note", note.reference()).unwrap();

    let seen_by_b = b.get_as::<ObjectRef>("note").unwrap().unwrap();
    assert_eq!(seen_by_b.store, b.id());
    assert_eq!(seen_by_b.rowid, note.rowid());
    assert!(b.handle::<Note>(note.reference()).is_err());
}

#[test]
fn test_file_backed_stores_share_commits() {
    let dir = TempDir::new().unwrap();
    let a = file_store(&dir);
    let b = file_store(&dir);

    let note = a.create(Note { text: "on disk".into() }).unwrap();
    a.set("note", note.reference()).unwrap();

    let reference = b.get_as::<ObjectRef>("note").unwrap().unwrap();
    assert_eq!(b.load::<Note>(reference.rowid).unwrap().text, "on disk");

    b.handle::<Note>(reference)
        .unwrap()
        .update(|n| n.text = "edited".into())
        .unwrap();
    assert_eq!(note.get().unwrap().text, "edited");
}

#[test]
fn test_file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let rowid = {
        let store = file_store(&dir);
        let note = store.create(Note { text: "kept".into() }).unwrap();
        store.set("note", note.reference()).unwrap();
        store.set("count", 3).unwrap();
        note.rowid()
    };

    let store = file_store(&dir);
    assert_eq!(store.get("count").unwrap(), Some(Value::Int(3)));
    assert_eq!(store.load::<Note>(rowid).unwrap().text, "kept");
    assert_eq!(store.log_entries(store.root().rowid, "count").unwrap().len(), 1);
}

#[test]
fn test_persisted_log_setting_wins_on_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_with_config(dir.path(), StoreConfig::default().with_log(false)).unwrap();
        store.set("x", 1).unwrap();
    }
    assert!(dir.path().join("koya.toml").exists());
    let store = Store::open_with_config(dir.path(), StoreConfig::default()).unwrap();
    assert!(!store.use_log());
    assert!(store.revisions().unwrap().is_empty());
}

#[test]
fn test_global_cache_can_be_disabled() {
    let medium = MemoryMedium::new();
    let store = Store::builder()
        .backend(MemoryBackend::with_medium(medium))
        .config(StoreConfig::default().with_global_cache(false))
        .register::<Note>()
        .open()
        .unwrap();
    let note = store.create(Note { text: "a".into() }).unwrap();
    store.set("note", note.reference()).unwrap();
    assert_eq!(note.get().unwrap().text, "a");
    store
        .transaction(|txn| txn.set_property(note.rowid(), "@text", "b"))
        .unwrap();
    assert_eq!(note.get().unwrap().text, "b");
}
