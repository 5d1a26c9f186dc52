//! Revert-To-Time Tests
//!
//! Round trips through the property log, forward reverts and the two refusal
//! cases (logging disabled, target before the compaction horizon).

use std::thread;
use std::time::Duration;

use chrono::Utc;
use koya_core::{KoyaError, KoyaResult, ObjectRef, Revision, Value};
use koya_engine::{Fields, Persistent, Store, StoreConfig};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Account {
    owner: String,
    balance: i64,
}

impl Persistent for Account {
    const CLASS: &'static str = "account";

    fn extract_fields(&self) -> Fields {
        Fields::new()
            .with("owner", self.owner.as_str())
            .with("balance", self.balance)
    }

    fn materialize(_: &ObjectRef, fields: &Fields) -> KoyaResult<Self> {
        Ok(Self {
            owner: fields.get_as("owner")?,
            balance: fields.get_as("balance")?,
        })
    }
}

fn root_values(store: &Store) -> Vec<(String, Value)> {
    store
        .transaction(|txn| txn.properties(txn.root()?.rowid))
        .unwrap()
}

#[test]
fn test_revert_restores_values_and_deletions() {
    let store = Store::ephemeral().unwrap();
    store.set("kept", 1).unwrap();
    store.set("changed", "old").unwrap();
    store.set("deleted_later", 7).unwrap();
    let t = store.current_revision().unwrap();
    let snapshot = root_values(&store);

    store.set("changed", "new").unwrap();
    store.delete("deleted_later").unwrap();
    store.set("added_later", 9).unwrap();

    let stats = store.revert_to_revision(t).unwrap();
    assert_eq!(stats.affected, 3);
    assert_eq!(stats.restored, 2);
    assert_eq!(stats.deleted, 1);
    assert_eq!(root_values(&store), snapshot);
}

#[test]
fn test_revert_to_exact_revision_keeps_its_writes() {
    let store = Store::ephemeral().unwrap();
    store.set("x", "before").unwrap();
    store.set("x", "r1").unwrap();
    let r1 = store.current_revision().unwrap();
    store.set("x", "r2").unwrap();
    let r2 = store.current_revision().unwrap();
    assert_eq!(store.revisions().unwrap()[..2], [r2, r1]);

    store.revert_to_revision(r1).unwrap();
    assert_eq!(store.get("x").unwrap(), Some(Value::from("r1")));

    // One tick earlier the r1 write is not yet visible
    store
        .revert_to_revision(Revision::from_ticks(r1.ticks() - 1))
        .unwrap();
    assert_eq!(store.get("x").unwrap(), Some(Value::from("before")));
}

#[test]
fn test_revert_forward_again() {
    let store = Store::ephemeral().unwrap();
    store.set("x", 1).unwrap();
    let early = store.current_revision().unwrap();
    store.set("x", 2).unwrap();
    store.set("y", "later").unwrap();
    let late = store.current_revision().unwrap();

    store.revert_to_revision(early).unwrap();
    assert_eq!(store.get("x").unwrap(), Some(Value::Int(1)));
    assert_eq!(store.get("y").unwrap(), None);

    store.revert_to_revision(late).unwrap();
    assert_eq!(store.get("x").unwrap(), Some(Value::Int(2)));
    assert_eq!(store.get("y").unwrap(), Some(Value::from("later")));
}

#[test]
fn test_revert_is_a_new_revision() {
    let store = Store::ephemeral().unwrap();
    store.set("x", 1).unwrap();
    let t = store.current_revision().unwrap();
    store.set("x", 2).unwrap();
    let before = store.revisions().unwrap().len();

    store.revert_to_revision(t).unwrap();
    assert_eq!(store.revisions().unwrap().len(), before + 1);
    let history = store.log_entries(store.root().rowid, "x").unwrap();
    let values: Vec<_> = history.into_iter().map(|(_, v)| v).collect();
    assert_eq!(
        values,
        vec![Some(Value::Int(1)), Some(Value::Int(2)), Some(Value::Int(1))]
    );
}

#[test]
fn test_revert_to_now_changes_nothing() {
    let store = Store::ephemeral().unwrap();
    store.set("x", 1).unwrap();
    let revision = store.current_revision().unwrap();
    let stats = store.revert_to(Utc::now()).unwrap();
    assert_eq!(stats.affected, 0);
    assert_eq!(store.current_revision().unwrap(), revision);
}

#[test]
fn test_revert_to_wall_clock_time() {
    let store = Store::ephemeral().unwrap();
    store.set("x", 1).unwrap();
    thread::sleep(Duration::from_millis(5));
    let t = Utc::now();
    thread::sleep(Duration::from_millis(5));
    store.set("x", 2).unwrap();

    store.revert_to(t).unwrap();
    assert_eq!(store.get("x").unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_revert_reloads_typed_objects() {
    let store = Store::builder().register::<Account>().open().unwrap();
    let account = store
        .create(Account {
            owner: "ada".into(),
            balance: 10,
        })
        .unwrap();
    store.set("account", account.reference()).unwrap();
    let t = store.current_revision().unwrap();

    account.update(|a| a.balance = 99).unwrap();
    assert_eq!(account.get().unwrap().balance, 99);

    store.revert_to_revision(t).unwrap();
    assert_eq!(account.get().unwrap().balance, 10);
    assert_eq!(account.snapshot().unwrap().balance, 10);
}

#[test]
fn test_revert_inside_transaction_discards_materialized_changes() {
    let store = Store::builder().register::<Account>().open().unwrap();
    let account = store
        .create(Account {
            owner: "ada".into(),
            balance: 10,
        })
        .unwrap();
    store.set("account", account.reference()).unwrap();
    let t = store.current_revision().unwrap();

    store
        .transaction(|txn| {
            txn.update::<Account, _, _>(account.rowid(), |a| a.balance = 50)?;
            txn.revert_to_revision(t)?;
            assert_eq!(txn.load::<Account>(account.rowid())?.balance, 10);
            Ok(())
        })
        .unwrap();
    assert_eq!(account.get().unwrap().balance, 10);
}

#[test]
fn test_revert_without_log_fails() {
    let store = Store::builder()
        .config(StoreConfig::default().with_log(false))
        .open()
        .unwrap();
    store.set("x", 1).unwrap();
    let result = store.revert_to_revision(Revision::ZERO);
    assert!(matches!(result, Err(KoyaError::CanNotRevert)));
}

#[test]
fn test_revert_beyond_compaction_is_rejected() {
    let store = Store::ephemeral().unwrap();
    store.set("x", 1).unwrap();
    let before_gc = store.current_revision().unwrap();
    store.transaction(|txn| txn.create_object("garbage")).unwrap();
    store.gc().unwrap();
    let horizon = store.compaction_horizon().unwrap().unwrap();

    match store.revert_to_revision(before_gc) {
        Err(KoyaError::RevertBeyondCompaction { requested, horizon: h }) => {
            assert_eq!(requested, before_gc);
            assert_eq!(h, horizon);
        }
        other => panic!("expected RevertBeyondCompaction, got {:?}", other),
    }

    store.set("x", 2).unwrap();
    store.revert_to_revision(horizon).unwrap();
    assert_eq!(store.get("x").unwrap(), Some(Value::Int(1)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Reverting to the revision after step k reproduces the state after step k
    #[test]
    fn prop_revert_round_trip(
        steps in prop::collection::vec(("[a-c]", prop::option::of(0i64..100)), 1..10),
        pick in any::<prop::sample::Index>(),
    ) {
        let store = Store::ephemeral().unwrap();
        let mut checkpoints = Vec::new();
        for (name, value) in &steps {
            match value {
                Some(v) => store.set(name, *v).unwrap(),
                None => store.delete(name).unwrap(),
            }
            checkpoints.push((store.current_revision().unwrap(), root_values(&store)));
        }
        let latest = root_values(&store);
        let latest_revision = store.current_revision().unwrap();

        let (target, expected) = checkpoints[pick.index(checkpoints.len())].clone();
        store.revert_to_revision(target).unwrap();
        prop_assert_eq!(root_values(&store), expected);

        store.revert_to_revision(latest_revision).unwrap();
        prop_assert_eq!(root_values(&store), latest);
    }
}
