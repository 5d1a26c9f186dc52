//! Transaction protocol
//!
//! A store runs at most one outermost transaction at a time. The store-wide
//! lock is a `parking_lot::ReentrantMutex`, held for the whole outermost
//! transaction; a transaction started on a thread that already holds it joins
//! the running one instead of opening a new backend transaction.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Active -> Committing -> Idle
//!              \--> Aborting ---/
//! ```
//!
//! - Begin (outermost): open the backend transaction, read the version record,
//!   pick a revision candidate strictly after the current revision, begin the
//!   cache.
//! - Join (nested): fail fast with `TransactionAborted` if the outer
//!   transaction already failed, otherwise run against it.
//! - A nested body that fails rolls the backend back at once and flags the
//!   outer transaction aborted; every later operation in it fails.
//! - Commit (outermost, body Ok, not aborted): write back the cache, persist
//!   the candidate as the current revision if anything was mutated, commit.
//! - Always: the cache context is discarded and the state returns to Idle.

use std::cell::RefCell;

use koya_core::keys;
use koya_core::{KoyaError, KoyaResult, ObjectRef, Revision, RowId, StoreId, VersionRecord};
use parking_lot::ReentrantMutexGuard;
use tracing::{debug, warn};

use crate::cache::ObjectCache;
use crate::store::Store;

/// Per-store transaction state behind the store lock.
#[derive(Debug)]
pub(crate) struct TxnState {
    pub(crate) active: Option<ActiveTxn>,
    pub(crate) cache: ObjectCache,
}

impl TxnState {
    pub(crate) fn new(global_cache: bool) -> Self {
        TxnState {
            active: None,
            cache: ObjectCache::new(global_cache),
        }
    }
}

/// The running outermost transaction.
#[derive(Debug)]
pub(crate) struct ActiveTxn {
    /// Revision this transaction commits as, if it mutates anything.
    pub(crate) candidate: Revision,
    /// Version record as read at begin; rewritten at commit when changed.
    pub(crate) record: VersionRecord,
    /// Reason of the failure that aborted this transaction.
    pub(crate) aborted: Option<String>,
    /// A property or object was mutated.
    pub(crate) dirty: bool,
    /// The version record needs rewriting regardless of `dirty`.
    pub(crate) record_changed: bool,
    /// Nesting depth of joined bodies.
    pub(crate) depth: usize,
    /// Objects created by this transaction; GC treats them as roots until commit.
    pub(crate) created: Vec<RowId>,
}

/// Handle to the running transaction, passed to transaction bodies.
///
/// All object and property operations are methods on this type. It is only
/// obtainable from [`Store::transaction`] and related entry points, so an
/// operation can never run outside a transaction.
pub struct Transaction<'s> {
    pub(crate) store: &'s Store,
    state: &'s RefCell<TxnState>,
}

impl<'s> Transaction<'s> {
    /// The store this transaction runs on.
    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Identity of the store, carried by every reference.
    pub fn store_id(&self) -> StoreId {
        self.store.id()
    }

    /// Reference to `rowid` in this store.
    pub fn reference(&self, rowid: RowId) -> ObjectRef {
        ObjectRef::new(self.store.id(), rowid)
    }

    /// Revision this transaction will commit as.
    pub fn revision(&self) -> KoyaResult<Revision> {
        self.with_active(|active| active.candidate)
    }

    /// Whether the outermost transaction has already failed.
    pub fn is_aborted(&self) -> bool {
        self.state
            .borrow()
            .active
            .as_ref()
            .map_or(false, |active| active.aborted.is_some())
    }

    /// Run `f` as a nested transaction.
    ///
    /// Joins this transaction. If `f` fails, this transaction is aborted as
    /// well and every later operation on it fails with `TransactionAborted`.
    pub fn transaction<F, T>(&self, f: F) -> KoyaResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> KoyaResult<T>,
    {
        self.store.transaction(f)
    }

    /// Mark the transaction aborted without failing the body.
    ///
    /// The backend is rolled back immediately; the outermost transaction
    /// returns `TransactionAborted` even if its body succeeds.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let first = {
            let mut state = self.state.borrow_mut();
            match state.active.as_mut() {
                Some(active) if active.aborted.is_none() => {
                    active.aborted = Some(reason.clone());
                    true
                }
                _ => false,
            }
        };
        if first {
            warn!(target: "koya::txn", reason = %reason, "Transaction aborted");
            self.store.rollback_backend();
        }
    }

    // ------------------------------------------------------------------------
    // State access for the rest of the crate
    // ------------------------------------------------------------------------

    /// Run `f` against the active, non-aborted transaction.
    pub(crate) fn with_active<R>(&self, f: impl FnOnce(&mut ActiveTxn) -> R) -> KoyaResult<R> {
        let mut state = self.state.borrow_mut();
        match state.active.as_mut() {
            None => Err(KoyaError::TransactionNotFound),
            Some(active) => match &active.aborted {
                Some(reason) => Err(KoyaError::aborted(reason.clone())),
                None => Ok(f(active)),
            },
        }
    }

    /// Fail unless the transaction can still run operations.
    pub(crate) fn check(&self) -> KoyaResult<()> {
        self.with_active(|_| ())
    }

    pub(crate) fn with_cache<R>(&self, f: impl FnOnce(&mut ObjectCache) -> R) -> R {
        f(&mut self.state.borrow_mut().cache)
    }

    pub(crate) fn mark_dirty(&self) -> KoyaResult<()> {
        self.with_active(|active| active.dirty = true)
    }

    /// Copy of the version record as this transaction sees it.
    pub(crate) fn record(&self) -> KoyaResult<VersionRecord> {
        self.with_active(|active| active.record.clone())
    }

    pub(crate) fn update_record(&self, f: impl FnOnce(&mut VersionRecord)) -> KoyaResult<()> {
        self.with_active(|active| {
            f(&mut active.record);
            active.record_changed = true;
        })
    }
}

// ============================================================================
// Protocol
// ============================================================================

/// Rolls back an outermost frame that exits without finishing (panic).
struct FrameGuard<'a> {
    store: &'a Store,
    state: &'a RefCell<TxnState>,
    finished: bool,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(target: "koya::txn", "Transaction body panicked, rolling back");
        self.store.rollback_backend();
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.active = None;
            state.cache.clear();
        }
    }
}

impl Store {
    /// Execute `f` in a transaction.
    ///
    /// Outermost calls open a backend transaction and commit it if `f`
    /// returns `Ok`; any error rolls everything back and is returned
    /// unchanged. Calls made while this thread already runs a transaction on
    /// this store join it.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let count = store.transaction(|txn| {
    ///     let root = txn.root()?;
    ///     let n = txn.get_as::<i64>(root.rowid, "count")?.unwrap_or(0);
    ///     txn.set_property(root.rowid, "count", n + 1)?;
    ///     Ok(n + 1)
    /// })?;
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> KoyaResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> KoyaResult<T>,
    {
        let guard = self.state.lock();
        let joined = {
            let mut state = guard.borrow_mut();
            match state.active.as_mut() {
                Some(active) => {
                    if let Some(reason) = &active.aborted {
                        return Err(KoyaError::aborted(reason.clone()));
                    }
                    active.depth += 1;
                    true
                }
                None => false,
            }
        };
        if joined {
            self.run_nested(&guard, f)
        } else {
            self.run_outermost(&guard, f)
        }
    }

    /// Execute `f` only if this thread is already inside a transaction on
    /// this store
    ///
    /// Returns `TransactionNotFound` otherwise; never opens a transaction.
    pub fn active_transaction<F, T>(&self, f: F) -> KoyaResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> KoyaResult<T>,
    {
        if !self.in_transaction() {
            return Err(KoyaError::TransactionNotFound);
        }
        self.transaction(f)
    }

    /// Whether this thread is inside a transaction on this store.
    pub fn in_transaction(&self) -> bool {
        // A successful try_lock with an active transaction means this thread
        // owns it: another thread's transaction would hold the lock.
        self.state.try_lock().map_or(false, |guard| {
            let state = guard.borrow();
            state.active.is_some()
        })
    }

    fn run_nested<F, T>(&self, guard: &ReentrantMutexGuard<'_, RefCell<TxnState>>, f: F) -> KoyaResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> KoyaResult<T>,
    {
        let mut txn = Transaction {
            store: self,
            state: guard,
        };
        let result = f(&mut txn);
        if let Some(active) = guard.borrow_mut().active.as_mut() {
            active.depth -= 1;
        }
        if let Err(e) = &result {
            debug!(target: "koya::txn", error = %e, "Nested transaction failed");
            txn.abort(e.to_string());
        }
        result
    }

    fn run_outermost<F, T>(
        &self,
        guard: &ReentrantMutexGuard<'_, RefCell<TxnState>>,
        f: F,
    ) -> KoyaResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> KoyaResult<T>,
    {
        let state: &RefCell<TxnState> = guard;
        self.backend.begin()?;
        let record = match self.read_record() {
            Ok(record) => record,
            Err(e) => {
                self.rollback_backend();
                return Err(e);
            }
        };
        let candidate = Revision::candidate_after(record.revision);
        {
            let mut st = state.borrow_mut();
            st.cache.begin(record.revision);
            st.active = Some(ActiveTxn {
                candidate,
                record,
                aborted: None,
                dirty: false,
                record_changed: false,
                depth: 0,
                created: Vec::new(),
            });
        }
        debug!(target: "koya::txn", store = %self.id(), %candidate, "Transaction started");

        let mut frame = FrameGuard {
            store: self,
            state,
            finished: false,
        };
        let mut txn = Transaction { store: self, state };
        let result = f(&mut txn);
        let outcome = self.finish(&txn, result);
        frame.finished = true;

        let mut st = state.borrow_mut();
        st.active = None;
        st.cache.done();
        outcome
    }

    fn finish<T>(&self, txn: &Transaction<'_>, result: KoyaResult<T>) -> KoyaResult<T> {
        let aborted = txn
            .state
            .borrow()
            .active
            .as_ref()
            .and_then(|active| active.aborted.clone());
        match (result, aborted) {
            (Err(e), _) => {
                warn!(target: "koya::txn", error = %e, "Transaction rolled back");
                self.rollback_backend();
                Err(e)
            }
            (Ok(_), Some(reason)) => {
                self.rollback_backend();
                Err(KoyaError::aborted(reason))
            }
            (Ok(value), None) => match self.commit_active(txn) {
                Ok(()) => Ok(value),
                Err(e) => {
                    warn!(target: "koya::txn", error = %e, "Commit failed, rolled back");
                    self.rollback_backend();
                    txn.with_cache(|cache| cache.clear_global());
                    Err(e)
                }
            },
        }
    }

    fn commit_active(&self, txn: &Transaction<'_>) -> KoyaResult<()> {
        let snapshots = txn.write_back()?;
        let (dirty, record_changed, candidate, mut record) = txn.with_active(|active| {
            (
                active.dirty,
                active.record_changed,
                active.candidate,
                active.record.clone(),
            )
        })?;
        if dirty {
            record.revision = candidate;
        }
        if dirty || record_changed {
            self.backend.put(keys::VERSION, &record.to_bytes()?)?;
        }
        self.backend.commit()?;
        debug!(target: "koya::txn", revision = %record.revision, dirty, objects = snapshots.len(), "Transaction committed");
        txn.with_cache(|cache| cache.publish(snapshots, record.revision));
        Ok(())
    }

    /// Abort the backend transaction if one is open; secondary errors are logged.
    pub(crate) fn rollback_backend(&self) {
        if self.backend.in_transaction() {
            if let Err(e) = self.backend.abort() {
                warn!(target: "koya::txn", error = %e, "Backend rollback failed");
            }
        }
    }
}
