//! Dict: free-form string keys mapped to values
//!
//! Each entry is one property of the dict object. Keys may be any string
//! except those starting with `@`, which is reserved for object fields.

use std::sync::Arc;

use koya_core::{KoyaError, KoyaResult, ObjectRef, Value, FIELD_MARKER};
use koya_engine::Store;

use crate::facade::{check_tagged, create_tagged};

/// Class tag of dict objects
pub const DICT_CLASS: &str = "dict";

/// String-keyed map persisted as object properties
#[derive(Clone, Debug)]
pub struct Dict {
    store: Arc<Store>,
    reference: ObjectRef,
}

fn check_key(key: &str) -> KoyaResult<()> {
    if key.starts_with(FIELD_MARKER) {
        return Err(KoyaError::invalid_input(format!(
            "dict key {:?} uses the reserved field marker",
            key
        )));
    }
    Ok(())
}

impl Dict {
    /// Create an empty dict
    pub fn create(store: &Arc<Store>) -> KoyaResult<Self> {
        let reference = store.transaction(|txn| create_tagged(txn, DICT_CLASS))?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// Open an existing dict
    pub fn open(store: &Arc<Store>, reference: ObjectRef) -> KoyaResult<Self> {
        check_tagged(store, reference, DICT_CLASS)?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// The dict object's reference
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    /// Value under `key`
    pub fn get(&self, key: &str) -> KoyaResult<Option<Value>> {
        check_key(key)?;
        self.store
            .transaction(|txn| txn.get_property(self.reference.rowid, key))
    }

    /// Set `key` to `value`
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> KoyaResult<()> {
        check_key(key)?;
        let value = value.into();
        self.store
            .transaction(|txn| txn.set_property(self.reference.rowid, key, value))
    }

    /// Remove `key`, returning its previous value
    pub fn remove(&self, key: &str) -> KoyaResult<Option<Value>> {
        check_key(key)?;
        self.store.transaction(|txn| {
            let previous = txn.get_property(self.reference.rowid, key)?;
            if previous.is_some() {
                txn.delete_property(self.reference.rowid, key)?;
            }
            Ok(previous)
        })
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: &str) -> KoyaResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Entries ordered by key
    pub fn entries(&self) -> KoyaResult<Vec<(String, Value)>> {
        self.store.transaction(|txn| {
            Ok(txn
                .properties(self.reference.rowid)?
                .into_iter()
                .filter(|(name, _)| !name.starts_with(FIELD_MARKER))
                .collect())
        })
    }

    /// Keys in order
    pub fn keys(&self) -> KoyaResult<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Values in key order
    pub fn values(&self) -> KoyaResult<Vec<Value>> {
        Ok(self.entries()?.into_iter().map(|(_, v)| v).collect())
    }

    /// Number of entries
    pub fn len(&self) -> KoyaResult<usize> {
        Ok(self.entries()?.len())
    }

    /// Whether the dict has no entries
    pub fn is_empty(&self) -> KoyaResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let store = Store::ephemeral().unwrap();
        let dict = Dict::create(&store).unwrap();
        store.set("dict", dict.reference()).unwrap();

        dict.insert("b", 2).unwrap();
        dict.insert("a", "one").unwrap();
        assert_eq!(dict.get("a").unwrap(), Some(Value::from("one")));
        assert_eq!(dict.keys().unwrap(), vec!["a", "b"]);
        assert_eq!(dict.values().unwrap(), vec![Value::from("one"), Value::Int(2)]);

        assert_eq!(dict.remove("b").unwrap(), Some(Value::Int(2)));
        assert_eq!(dict.remove("b").unwrap(), None);
        assert!(!dict.contains_key("b").unwrap());
        assert_eq!(dict.len().unwrap(), 1);
    }

    #[test]
    fn test_field_marker_keys_rejected() {
        let store = Store::ephemeral().unwrap();
        let dict = Dict::create(&store).unwrap();
        assert!(dict.insert("@size", 1).is_err());
        assert!(dict.get("@size").is_err());
    }

    #[test]
    fn test_references_keep_values_alive() {
        let store = Store::ephemeral().unwrap();
        let dict = Dict::create(&store).unwrap();
        store.set("dict", dict.reference()).unwrap();
        let member = store.transaction(|txn| txn.create_object("thing")).unwrap();
        dict.insert("member", member).unwrap();

        store.gc().unwrap();
        assert!(store.exists(member.rowid).unwrap());

        dict.remove("member").unwrap();
        store.gc().unwrap();
        assert!(!store.exists(member.rowid).unwrap());
    }
}
