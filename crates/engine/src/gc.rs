//! Mark-sweep garbage collection
//!
//! Roots are the root object, every pinned (`lock.*`) object and every object
//! created by the transaction the pass runs in. Marking follows Reference-kind
//! properties breadth-first until a round marks nothing new. Unmarked objects
//! lose their class tag, properties and pin without any log entry.
//!
//! When anything was swept and logging is on, the log is compacted: every
//! entry is dropped and each surviving property is rewritten as one entry at
//! the compaction revision, which becomes the store's revert horizon.
//!
//! The pass runs as two internal transactions (collect, then compact) while
//! holding the store lock throughout, so no other transaction interleaves. A
//! failure leaves the store as the last completed phase left it.

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use koya_core::keys;
use koya_core::{remove_prefix, scan_prefix, scan_prefix_keys, KoyaResult, RowId, StoredProperty};
use tracing::{debug, info};

use crate::store::Store;
use crate::transaction::Transaction;

/// Outcome of one GC pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Objects considered
    pub scanned: usize,
    /// Objects reachable from root or pinned.
    pub live: usize,
    /// Objects deleted
    pub swept: usize,
    /// Log entries dropped by compaction.
    pub log_entries_compacted: usize,
    /// Propagation rounds until the fixed point.
    pub rounds: usize,
}

struct Marking {
    candidates: BTreeSet<RowId>,
    live: HashSet<RowId>,
    rounds: usize,
}

impl<'s> Transaction<'s> {
    fn mark(&self) -> KoyaResult<Marking> {
        let backend = self.backend();
        let candidates = scan_prefix_keys(backend, keys::CLASS_PREFIX)?
            .iter()
            .map(|key| keys::parse_class_key(key))
            .collect::<KoyaResult<BTreeSet<_>>>()?;

        let mut live = HashSet::new();
        let mut frontier = Vec::new();
        let root = self.record()?.root;
        let pinned = scan_prefix_keys(backend, keys::LOCK_PREFIX)?
            .iter()
            .map(|key| keys::parse_lock_key(key))
            .collect::<KoyaResult<Vec<_>>>()?;
        let created = self.with_active(|active| active.created.clone())?;
        for rowid in std::iter::once(root).chain(pinned).chain(created) {
            if candidates.contains(&rowid) && live.insert(rowid) {
                frontier.push(rowid);
            }
        }

        let mut rounds = 0;
        while !frontier.is_empty() {
            rounds += 1;
            let mut next = Vec::new();
            for rowid in frontier {
                for (_, bytes) in scan_prefix(backend, &keys::property_prefix(rowid))? {
                    if let Some(target) = StoredProperty::from_bytes(&bytes)?.referenced_rowid() {
                        if candidates.contains(&target) && live.insert(target) {
                            next.push(target);
                        }
                    }
                }
            }
            debug!(target: "koya::gc", round = rounds, marked = next.len(), "Mark round");
            frontier = next;
        }

        Ok(Marking {
            candidates,
            live,
            rounds,
        })
    }

    fn sweep(&self, dead: &[RowId]) -> KoyaResult<()> {
        let backend = self.backend();
        for &rowid in dead {
            backend.delete(&keys::class_key(rowid))?;
            remove_prefix(backend, &keys::property_prefix(rowid))?;
            backend.delete(&keys::lock_key(rowid))?;
            self.with_cache(|cache| cache.evict(rowid));
        }
        if !dead.is_empty() {
            self.mark_dirty()?;
        }
        Ok(())
    }

    fn compact_log(&self) -> KoyaResult<usize> {
        let horizon = self.revision()?;
        let backend = self.backend();
        let dropped = remove_prefix(backend, keys::LOG_PREFIX)?;
        remove_prefix(backend, keys::REVISION_PREFIX)?;
        let current = scan_prefix(backend, keys::PROPERTY_PREFIX)?;
        for (key, bytes) in &current {
            let (rowid, name) = keys::parse_property_key(key)?;
            backend.put(&keys::log_key(horizon, rowid, &name), bytes)?;
        }
        backend.put(&keys::revision_key(horizon), b"1")?;
        self.update_record(|record| record.compacted_at = Some(horizon))?;
        self.mark_dirty()?;
        debug!(target: "koya::gc", %horizon, dropped, rewritten = current.len(), "Log compacted");
        Ok(dropped)
    }
}

impl Store {
    /// Run one GC pass.
    ///
    /// Inside a transaction the pass joins it, after writing back objects
    /// materialized so far so their references count.
    pub fn gc(&self) -> KoyaResult<GcStats> {
        let _pass = self.state.lock();
        let started = Instant::now();

        if self.in_transaction() {
            self.transaction(|txn| txn.flush_context())?;
        }

        let (marking, dead) = self.transaction(|txn| {
            let marking = txn.mark()?;
            let dead: Vec<RowId> = marking
                .candidates
                .iter()
                .filter(|rowid| !marking.live.contains(*rowid))
                .copied()
                .collect();
            txn.sweep(&dead)?;
            Ok((marking, dead))
        })?;

        let log_entries_compacted = if self.use_log() && !dead.is_empty() {
            self.transaction(|txn| txn.compact_log())?
        } else {
            0
        };

        let stats = GcStats {
            scanned: marking.candidates.len(),
            live: marking.live.len(),
            swept: dead.len(),
            log_entries_compacted,
            rounds: marking.rounds,
        };
        info!(
            target: "koya::gc",
            scanned = stats.scanned,
            live = stats.live,
            swept = stats.swept,
            compacted = stats.log_entries_compacted,
            rounds = stats.rounds,
            elapsed = ?started.elapsed(),
            "GC pass complete"
        );
        Ok(stats)
    }
}
