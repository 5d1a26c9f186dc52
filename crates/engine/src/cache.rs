//! Two-tier object cache
//!
//! The context tier holds objects materialized by the running transaction: at
//! most one per rowid. The global tier holds detached copies of objects from
//! committed transactions, stamped with the revision they were committed at.
//!
//! Invalidation is whole-cache: when a transaction begins and the store's
//! current revision differs from the stamp, the global tier is dropped.

use std::collections::HashMap;

use koya_core::{KoyaResult, Revision, RowId};
use tracing::trace;

use crate::object::{Fields, Model};
use crate::transaction::Transaction;

/// A materialized object and the field values last synchronized to storage.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The object
    pub object: Box<dyn Model>,
    /// Stored field values the object was loaded from or last written back.
    pub synced: Fields,
}

/// Context and global tiers.
#[derive(Debug)]
pub struct ObjectCache {
    context: HashMap<RowId, CacheEntry>,
    global: HashMap<RowId, CacheEntry>,
    stamp: Option<Revision>,
    global_enabled: bool,
}

impl ObjectCache {
    /// Empty cache; `global_enabled = false` keeps nothing across transactions.
    pub fn new(global_enabled: bool) -> Self {
        ObjectCache {
            context: HashMap::new(),
            global: HashMap::new(),
            stamp: None,
            global_enabled,
        }
    }

    /// Start a transaction's working set.
    pub fn begin(&mut self, current: Revision) {
        if !self.global.is_empty() && self.stamp != Some(current) {
            trace!(target: "koya::cache", entries = self.global.len(), stamp = ?self.stamp, %current, "Global cache invalidated");
            self.global.clear();
        }
        self.stamp = Some(current);
    }

    /// Context entry for `rowid`, promoting it from the global tier if needed.
    pub fn get(&mut self, rowid: RowId) -> Option<&CacheEntry> {
        if !self.context.contains_key(&rowid) {
            let promoted = self.global.remove(&rowid)?;
            self.context.insert(rowid, promoted);
        }
        self.context.get(&rowid)
    }

    /// Remove and return the context entry (promoting first).
    pub fn take(&mut self, rowid: RowId) -> Option<CacheEntry> {
        self.get(rowid)?;
        self.context.remove(&rowid)
    }

    /// Install into the context, replacing any prior entry.
    pub fn put(&mut self, rowid: RowId, entry: CacheEntry) {
        self.context.insert(rowid, entry);
    }

    /// Whether the context holds `rowid`.
    pub fn in_context(&self, rowid: RowId) -> bool {
        self.context.contains_key(&rowid)
    }

    /// Whether the global tier holds `rowid`.
    pub fn in_global(&self, rowid: RowId) -> bool {
        self.global.contains_key(&rowid)
    }

    /// Remove every context entry, in rowid order.
    pub fn drain_context(&mut self) -> Vec<(RowId, CacheEntry)> {
        let mut entries: Vec<_> = self.context.drain().collect();
        entries.sort_by_key(|(rowid, _)| *rowid);
        entries
    }

    /// Install committed snapshots into the global tier.
    pub fn publish(&mut self, snapshots: Vec<(RowId, CacheEntry)>, committed: Revision) {
        self.stamp = Some(committed);
        if self.global_enabled {
            self.global.extend(snapshots);
        }
    }

    /// End of transaction: discard the context.
    pub fn done(&mut self) {
        self.context.clear();
    }

    /// Drop one rowid from both tiers.
    pub fn evict(&mut self, rowid: RowId) {
        self.context.remove(&rowid);
        self.global.remove(&rowid);
    }

    /// Drop the global tier.
    pub fn clear_global(&mut self) {
        self.global.clear();
        self.stamp = None;
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.context.clear();
        self.clear_global();
    }

    /// Context size
    pub fn context_len(&self) -> usize {
        self.context.len()
    }

    /// Global size
    pub fn global_len(&self) -> usize {
        self.global.len()
    }
}

// ============================================================================
// Write-back
// ============================================================================

impl<'s> Transaction<'s> {
    /// Write changed fields of one entry; returns the fields now stored.
    fn sync_entry(&self, rowid: RowId, entry: &CacheEntry) -> KoyaResult<Fields> {
        let current = entry.object.extract_fields();
        for (name, value) in &current {
            if entry.synced.get(name) != Some(value) {
                self.write_field(rowid, name, Some(value))?;
            }
        }
        for (name, _) in &entry.synced {
            if !current.contains(name) {
                self.write_field(rowid, name, None)?;
            }
        }
        Ok(current)
    }

    /// Commit-time write-back: sync every context object, return snapshots.
    pub(crate) fn write_back(&self) -> KoyaResult<Vec<(RowId, CacheEntry)>> {
        let entries = self.with_cache(|cache| cache.drain_context());
        let mut snapshots = Vec::with_capacity(entries.len());
        for (rowid, mut entry) in entries {
            entry.synced = self.sync_entry(rowid, &entry)?;
            snapshots.push((rowid, entry));
        }
        Ok(snapshots)
    }

    /// Sync every context object, keeping them in the context.
    pub(crate) fn flush_context(&self) -> KoyaResult<()> {
        for (rowid, mut entry) in self.with_cache(|cache| cache.drain_context()) {
            entry.synced = self.sync_entry(rowid, &entry)?;
            self.with_cache(|cache| cache.put(rowid, entry));
        }
        Ok(())
    }

    /// Sync one object if it is materialized, then forget it.
    pub(crate) fn flush_and_evict(&self, rowid: RowId) -> KoyaResult<()> {
        if let Some(entry) = self.with_cache(|cache| {
            let entry = cache.context.remove(&rowid);
            cache.global.remove(&rowid);
            entry
        }) {
            self.sync_entry(rowid, &entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Root;
    use koya_core::{ObjectRef, StoreId};

    fn entry(rowid: u64) -> CacheEntry {
        CacheEntry {
            object: Box::new(Root {
                reference: ObjectRef::new(StoreId::new(), RowId::new(rowid)),
            }),
            synced: Fields::new(),
        }
    }

    #[test]
    fn test_get_promotes_from_global() {
        let mut cache = ObjectCache::new(true);
        cache.begin(Revision::from_ticks(1));
        cache.publish(vec![(RowId::new(2), entry(2))], Revision::from_ticks(1));
        assert!(cache.in_global(RowId::new(2)));

        cache.begin(Revision::from_ticks(1));
        assert!(cache.get(RowId::new(2)).is_some());
        assert!(cache.in_context(RowId::new(2)));
        assert!(!cache.in_global(RowId::new(2)));
    }

    #[test]
    fn test_begin_discards_global_on_revision_change() {
        let mut cache = ObjectCache::new(true);
        cache.publish(vec![(RowId::new(2), entry(2))], Revision::from_ticks(5));
        cache.begin(Revision::from_ticks(5));
        assert_eq!(cache.global_len(), 1);
        cache.done();
        cache.begin(Revision::from_ticks(6));
        assert_eq!(cache.global_len(), 0);
    }

    #[test]
    fn test_disabled_global_keeps_nothing() {
        let mut cache = ObjectCache::new(false);
        cache.publish(vec![(RowId::new(2), entry(2))], Revision::from_ticks(5));
        assert_eq!(cache.global_len(), 0);
    }

    #[test]
    fn test_put_overwrites_and_done_clears() {
        let mut cache = ObjectCache::new(true);
        cache.put(RowId::new(3), entry(3));
        cache.put(RowId::new(3), entry(3));
        assert_eq!(cache.context_len(), 1);
        cache.done();
        assert_eq!(cache.context_len(), 0);
    }

    #[test]
    fn test_evict_and_take() {
        let mut cache = ObjectCache::new(true);
        cache.publish(vec![(RowId::new(4), entry(4))], Revision::from_ticks(1));
        cache.put(RowId::new(5), entry(5));
        assert!(cache.take(RowId::new(4)).is_some());
        assert_eq!(cache.global_len(), 0);
        cache.evict(RowId::new(5));
        assert_eq!(cache.context_len(), 0);
    }

    #[test]
    fn test_drain_is_ordered() {
        let mut cache = ObjectCache::new(true);
        for id in [9, 3, 7] {
            cache.put(RowId::new(id), entry(id));
        }
        let order: Vec<u64> = cache
            .drain_context()
            .into_iter()
            .map(|(r, _)| r.as_u64())
            .collect();
        assert_eq!(order, vec![3, 7, 9]);
    }
}
