//! Object sets
//!
//! Both sets hold references to other objects, one property per member keyed
//! by the member's rowid. `Set` uses the plain decimal rowid; `OrderedSet`
//! zero-pads it so property order, and therefore iteration order, is the
//! order in which members were created.

use std::sync::Arc;

use koya_core::{KoyaResult, ObjectRef, RowId};
use koya_engine::{Store, Transaction};

use crate::facade::{check_tagged, create_tagged};

/// Class tag of set objects
pub const SET_CLASS: &str = "set";

/// Class tag of ordered set objects
pub const ORDERED_SET_CLASS: &str = "ordered_set";

fn members(txn: &Transaction<'_>, rowid: RowId) -> KoyaResult<Vec<ObjectRef>> {
    Ok(txn
        .property_values(rowid)?
        .into_iter()
        .filter_map(|value| value.as_object_ref())
        .collect())
}

/// Unordered set of object references
#[derive(Clone, Debug)]
pub struct Set {
    store: Arc<Store>,
    reference: ObjectRef,
}

impl Set {
    /// Create an empty set
    pub fn create(store: &Arc<Store>) -> KoyaResult<Self> {
        let reference = store.transaction(|txn| create_tagged(txn, SET_CLASS))?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// Open an existing set
    pub fn open(store: &Arc<Store>, reference: ObjectRef) -> KoyaResult<Self> {
        check_tagged(store, reference, SET_CLASS)?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// The set object's reference
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    /// Add a member, returning its key
    pub fn add(&self, member: ObjectRef) -> KoyaResult<String> {
        let key = member.rowid.to_string();
        self.store
            .transaction(|txn| txn.set_property(self.reference.rowid, &key, member))?;
        Ok(key)
    }

    /// Remove a member; absent members are ignored
    pub fn remove(&self, member: ObjectRef) -> KoyaResult<()> {
        let key = member.rowid.to_string();
        self.store.transaction(|txn| {
            if txn.get_property(self.reference.rowid, &key)?.is_some() {
                txn.delete_property(self.reference.rowid, &key)?;
            }
            Ok(())
        })
    }

    /// Whether `member` is in the set
    pub fn contains(&self, member: ObjectRef) -> KoyaResult<bool> {
        let key = member.rowid.to_string();
        self.store
            .transaction(|txn| Ok(txn.get_property(self.reference.rowid, &key)?.is_some()))
    }

    /// Every member
    pub fn members(&self) -> KoyaResult<Vec<ObjectRef>> {
        self.store
            .transaction(|txn| members(txn, self.reference.rowid))
    }

    /// Number of members
    pub fn len(&self) -> KoyaResult<usize> {
        Ok(self.members()?.len())
    }

    /// Whether the set has no members
    pub fn is_empty(&self) -> KoyaResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Set of object references iterated in creation order
#[derive(Clone, Debug)]
pub struct OrderedSet {
    store: Arc<Store>,
    reference: ObjectRef,
}

fn order_key(member: ObjectRef) -> String {
    format!("{:020}", member.rowid.as_u64())
}

impl OrderedSet {
    /// Create an empty ordered set
    pub fn create(store: &Arc<Store>) -> KoyaResult<Self> {
        let reference = store.transaction(|txn| create_tagged(txn, ORDERED_SET_CLASS))?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// Open an existing ordered set
    pub fn open(store: &Arc<Store>, reference: ObjectRef) -> KoyaResult<Self> {
        check_tagged(store, reference, ORDERED_SET_CLASS)?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// The ordered set object's reference
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    /// Add a member
    pub fn add(&self, member: ObjectRef) -> KoyaResult<()> {
        self.store.transaction(|txn| {
            txn.set_property(self.reference.rowid, &order_key(member), member)
        })
    }

    /// Add every member of `members`
    pub fn extend<I: IntoIterator<Item = ObjectRef>>(&self, members: I) -> KoyaResult<()> {
        self.store.transaction(|txn| {
            for member in members {
                txn.set_property(self.reference.rowid, &order_key(member), member)?;
            }
            Ok(())
        })
    }

    /// Remove a member; absent members are ignored
    pub fn remove(&self, member: ObjectRef) -> KoyaResult<()> {
        let key = order_key(member);
        self.store.transaction(|txn| {
            if txn.get_property(self.reference.rowid, &key)?.is_some() {
                txn.delete_property(self.reference.rowid, &key)?;
            }
            Ok(())
        })
    }

    /// Whether `member` is in the set
    pub fn contains(&self, member: ObjectRef) -> KoyaResult<bool> {
        let key = order_key(member);
        self.store
            .transaction(|txn| Ok(txn.get_property(self.reference.rowid, &key)?.is_some()))
    }

    /// Members, oldest object first
    pub fn members(&self) -> KoyaResult<Vec<ObjectRef>> {
        self.store
            .transaction(|txn| members(txn, self.reference.rowid))
    }

    /// Number of members
    pub fn len(&self) -> KoyaResult<usize> {
        Ok(self.members()?.len())
    }

    /// Whether the set has no members
    pub fn is_empty(&self) -> KoyaResult<bool> {
        Ok(self.len()? == 0)
    }
}
