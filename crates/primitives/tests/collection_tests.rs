//! Collection Tests
//!
//! Collections composed inside transactions, surviving reopen, collected by
//! GC and reverted with the property log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use koya_core::{KoyaError, KoyaResult, Value};
use koya_engine::{Store, StoreConfig};
use koya_primitives::{CellList, Dict, LogStream, OrderedSet, Stream};
use tempfile::TempDir;

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Int(*v)).collect()
}

fn rooted_stream(store: &Arc<Store>, name: &str) -> Stream {
    let stream = Stream::create(store).unwrap();
    store.set(name, stream.reference()).unwrap();
    stream
}

// ============================================================================
// Revert
// ============================================================================

/// Scenario: push 1,2,3, mark, push 4,5, revert to the mark
#[test]
fn test_stream_reverts_to_earlier_contents() {
    let store = Store::ephemeral().unwrap();
    let stream = rooted_stream(&store, "stream");
    for v in 1..=3 {
        stream.push(v).unwrap();
    }
    let mark = store.current_revision().unwrap();
    stream.push(4).unwrap();
    stream.push(5).unwrap();
    assert_eq!(stream.len().unwrap(), 5);

    store.revert_to_revision(mark).unwrap();
    assert_eq!(stream.to_vec().unwrap(), ints(&[1, 2, 3]));
    assert_eq!(stream.get(-1).unwrap(), Some(Value::Int(3)));

    stream.push(6).unwrap();
    assert_eq!(stream.to_vec().unwrap(), ints(&[1, 2, 3, 6]));
}

#[test]
fn test_cell_list_reverts_links() {
    let store = Store::ephemeral().unwrap();
    let list = CellList::create(&store).unwrap();
    store.set("list", list.reference()).unwrap();
    list.push("a").unwrap();
    let b = list.push("b").unwrap();
    let mark = store.current_revision().unwrap();

    list.remove(&b).unwrap();
    list.unshift("z").unwrap();
    assert_eq!(list.values().unwrap(), vec![Value::from("z"), Value::from("a")]);

    store.revert_to_revision(mark).unwrap();
    assert_eq!(list.values().unwrap(), vec![Value::from("a"), Value::from("b")]);
}

// ============================================================================
// Atomic composition
// ============================================================================

#[test]
fn test_operations_compose_in_one_transaction() {
    let store = Store::ephemeral().unwrap();
    let queue = rooted_stream(&store, "queue");
    let done = rooted_stream(&store, "done");
    queue.replace(vec![1, 2, 3]).unwrap();

    store
        .transaction(|_| {
            while let Some(item) = queue.shift()? {
                done.push(item)?;
            }
            Ok(())
        })
        .unwrap();
    assert!(queue.is_empty().unwrap());
    assert_eq!(done.to_vec().unwrap(), ints(&[1, 2, 3]));

    let result: KoyaResult<()> = store.transaction(|_| {
        done.pop()?;
        queue.push(99)?;
        Err(KoyaError::application("rolled back"))
    });
    assert!(result.is_err());
    assert!(queue.is_empty().unwrap());
    assert_eq!(done.len().unwrap(), 3);
}

// ============================================================================
// Garbage collection
// ============================================================================

#[test]
fn test_unreachable_collections_are_collected() {
    let store = Store::ephemeral().unwrap();
    let kept = rooted_stream(&store, "kept");
    let dropped = Stream::create(&store).unwrap();
    let list = CellList::create(&store).unwrap();
    store.set("list", list.reference()).unwrap();
    let cells: Vec<_> = ["a", "b"].iter().map(|v| list.push(*v).unwrap()).collect();

    let stats = store.gc().unwrap();
    assert_eq!(stats.swept, 1);
    assert!(store.exists(kept.reference().rowid).unwrap());
    assert!(!store.exists(dropped.reference().rowid).unwrap());
    for cell in &cells {
        assert!(store.exists(cell.reference().rowid).unwrap());
    }

    let removed = list.pop().unwrap().unwrap();
    store.gc().unwrap();
    assert!(!store.exists(removed.reference().rowid).unwrap());
    assert_eq!(list.values().unwrap(), vec![Value::from("a")]);
}

#[test]
fn test_cell_list_push_survives_concurrent_gc() {
    let store = Store::builder()
        .config(StoreConfig::default().with_log(false))
        .open()
        .unwrap();
    let list = CellList::create(&store).unwrap();
    store.set("list", list.reference()).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                store.gc().unwrap();
            }
        });
        for i in 0..300 {
            if i % 2 == 0 {
                list.push(i).unwrap();
            } else {
                list.unshift(i).unwrap();
            }
        }
        done.store(true, Ordering::Release);
    });

    store.gc().unwrap();
    let cells = list.cells().unwrap();
    assert_eq!(cells.len(), 300);
    for cell in &cells {
        assert!(store.exists(cell.reference().rowid).unwrap());
    }
    assert_eq!(list.values().unwrap().first(), Some(&Value::Int(299)));
    assert_eq!(list.values().unwrap().last(), Some(&Value::Int(298)));
}

#[test]
fn test_ordered_set_members_outlive_other_references() {
    let store = Store::ephemeral().unwrap();
    let set = OrderedSet::create(&store).unwrap();
    store.set("set", set.reference()).unwrap();
    let members: Vec<_> = (0..3)
        .map(|_| store.transaction(|txn| txn.create_object("member")).unwrap())
        .collect();
    for member in &members {
        set.add(*member).unwrap();
    }
    assert_eq!(store.extent("member").unwrap(), members);

    set.remove(members[1]).unwrap();
    assert_eq!(store.extent("member").unwrap(), vec![members[0], members[2]]);
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_collections_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        let stream = rooted_stream(&store, "stream");
        stream.push("x").unwrap();
        stream.unshift("w").unwrap();
        let dict = Dict::create(&store).unwrap();
        store.set("dict", dict.reference()).unwrap();
        dict.insert("answer", 42).unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    let stream_ref = store.get_as("stream").unwrap().unwrap();
    let stream = Stream::open(&store, stream_ref).unwrap();
    assert_eq!(
        stream.to_vec().unwrap(),
        vec![Value::from("w"), Value::from("x")]
    );

    let dict_ref = store.get_as("dict").unwrap().unwrap();
    let dict = Dict::open(&store, dict_ref).unwrap();
    assert_eq!(dict.get("answer").unwrap(), Some(Value::Int(42)));
    assert!(Dict::open(&store, stream_ref).is_err());
}

#[test]
fn test_log_stream_limit_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        let log = LogStream::create(&store, Some(2)).unwrap();
        store.set("log", log.reference()).unwrap();
        log.push("a").unwrap();
        log.push("b").unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    let log_ref = store.get_as("log").unwrap().unwrap();
    let log = LogStream::open(&store, log_ref).unwrap();
    assert_eq!(log.limit().unwrap(), Some(2));
    assert_eq!(log.push("c").unwrap(), 1);
    assert_eq!(log.to_vec().unwrap(), vec![Value::from("b"), Value::from("c")]);

    let stamps: Vec<_> = log.entries().unwrap().into_iter().map(|(at, _)| at).collect();
    assert!(stamps[0] < stamps[1]);
    assert_eq!(stamps[1], store.current_revision().unwrap());
}
