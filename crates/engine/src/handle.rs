//! Typed handles onto stored objects
//!
//! A `Handle<T>` is what callers keep after a transaction ends: the object's
//! reference plus the copy last seen through it. Every accessor joins the
//! transaction running on this thread or opens its own.

use std::fmt;
use std::sync::Arc;

use koya_core::{KoyaResult, ObjectRef, RowId, Value};
use parking_lot::Mutex;

use crate::object::Persistent;
use crate::store::Store;

/// Reference to an object of type `T` with a detached snapshot.
pub struct Handle<T: Persistent> {
    store: Arc<Store>,
    reference: ObjectRef,
    snapshot: Mutex<Option<T>>,
}

impl<T: Persistent> Handle<T> {
    pub(crate) fn new(store: Arc<Store>, reference: ObjectRef) -> Self {
        Self {
            store,
            reference,
            snapshot: Mutex::new(None),
        }
    }

    pub(crate) fn with_snapshot(store: Arc<Store>, reference: ObjectRef, object: T) -> Self {
        Self {
            store,
            reference,
            snapshot: Mutex::new(Some(object)),
        }
    }

    /// The object's reference
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    /// The object's rowid
    pub fn rowid(&self) -> RowId {
        self.reference.rowid
    }

    /// The store the object lives in.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Current state of the object.
    pub fn get(&self) -> KoyaResult<T> {
        let joined = self.store.in_transaction();
        let outcome = self.store.transaction(|txn| txn.load::<T>(self.rowid()));
        self.remember(joined, outcome.as_ref().ok().cloned());
        outcome
    }

    /// Mutate the object; the change is written back when the transaction commits.
    pub fn update<R, F>(&self, f: F) -> KoyaResult<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let rowid = self.rowid();
        let joined = self.store.in_transaction();
        let outcome = self.store.transaction(|txn| {
            let result = txn.update::<T, R, F>(rowid, f)?;
            Ok((result, txn.load::<T>(rowid)?))
        });
        match outcome {
            Ok((result, object)) => {
                self.remember(joined, Some(object));
                Ok(result)
            }
            Err(e) => {
                self.remember(joined, None);
                Err(e)
            }
        }
    }

    /// Keep `seen` as the snapshot only if it was committed.
    ///
    /// Inside an enclosing transaction the state may still be rolled back, so
    /// the snapshot is dropped instead.
    fn remember(&self, joined: bool, seen: Option<T>) {
        *self.snapshot.lock() = if joined { None } else { seen };
    }

    /// Pin the object against collection; false if already pinned.
    pub fn lock(&self) -> KoyaResult<bool> {
        self.store.lock(self.rowid())
    }

    /// Remove the pin
    pub fn unlock(&self) -> KoyaResult<()> {
        self.store.unlock(self.rowid())
    }

    /// Read a raw property.
    pub fn property(&self, name: &str) -> KoyaResult<Option<Value>> {
        self.store.transaction(|txn| txn.get_property(self.rowid(), name))
    }

    /// Write a raw property.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> KoyaResult<()> {
        let value = value.into();
        self.store
            .transaction(|txn| txn.set_property(self.rowid(), name, value))
    }

    /// Copy last read or written through this handle, without touching the store.
    pub fn snapshot(&self) -> Option<T> {
        self.snapshot.lock().clone()
    }
}

impl<T: Persistent> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            reference: self.reference,
            snapshot: Mutex::new(self.snapshot()),
        }
    }
}

impl<T: Persistent> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("class", &T::CLASS)
            .field("reference", &self.reference)
            .finish()
    }
}
