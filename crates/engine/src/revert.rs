//! Revert-to-time
//!
//! Reconstructs every property changed after the target revision from the
//! property log and writes the reconstruction as a new transaction. The log
//! prefix up to the target is left intact, so reverting forward again later
//! is possible.
//!
//! Targets older than the last GC compaction are rejected with
//! `RevertBeyondCompaction`: the history before it no longer exists.

use std::collections::{BTreeMap, BTreeSet};

use koya_core::keys;
use koya_core::{KoyaError, KoyaResult, Revision, RowId, StoredProperty};
use tracing::{debug, info};

use crate::store::Store;
use crate::transaction::Transaction;

/// Outcome of a revert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertStats {
    /// Properties with log entries after the target.
    pub affected: usize,
    /// Properties written back to an earlier value.
    pub restored: usize,
    /// Properties removed because they did not exist at the target.
    pub deleted: usize,
}

impl<'s> Transaction<'s> {
    /// Revert the store to its state at `target`; see [`Store::revert_to_revision`]
    pub fn revert_to_revision(&self, target: Revision) -> KoyaResult<RevertStats> {
        if !self.store.use_log() {
            return Err(KoyaError::CanNotRevert);
        }
        if let Some(horizon) = self.compaction_horizon()? {
            if target < horizon {
                return Err(KoyaError::RevertBeyondCompaction {
                    requested: target,
                    horizon,
                });
            }
        }

        self.flush_context()?;
        self.with_cache(|cache| cache.clear());

        let mut at_target: BTreeMap<(RowId, String), StoredProperty> = BTreeMap::new();
        let mut affected: BTreeSet<(RowId, String)> = BTreeSet::new();
        for (key, stored) in self.log_scan()? {
            let slot = (key.rowid, key.name);
            if key.revision <= target {
                at_target.insert(slot, stored);
            } else {
                affected.insert(slot);
            }
        }

        let mut stats = RevertStats {
            affected: affected.len(),
            ..RevertStats::default()
        };
        for (rowid, name) in affected {
            let wanted = at_target
                .remove(&(rowid, name.clone()))
                .filter(|stored| !stored.is_deleted());
            let current = match self.backend().get(&keys::property_key(rowid, &name))? {
                Some(bytes) => Some(StoredProperty::from_bytes(&bytes)?),
                None => None,
            };
            if wanted == current {
                continue;
            }
            debug!(target: "koya::revert", %rowid, name = %name, restore = wanted.is_some(), "Reverting property");
            match wanted {
                Some(stored) => {
                    self.write_stored(rowid, &name, Some(&stored))?;
                    stats.restored += 1;
                }
                None => {
                    self.write_stored(rowid, &name, None)?;
                    stats.deleted += 1;
                }
            }
        }
        Ok(stats)
    }
}

impl Store {
    /// Revert every property to its value at `target`.
    ///
    /// Runs as one transaction (or joins the running one) with the object
    /// cache cleared first. Fails with `CanNotRevert` when logging is
    /// disabled.
    pub fn revert_to_revision(&self, target: Revision) -> KoyaResult<RevertStats> {
        let stats = self.transaction(|txn| txn.revert_to_revision(target))?;
        info!(
            target: "koya::revert",
            %target,
            affected = stats.affected,
            restored = stats.restored,
            deleted = stats.deleted,
            "Revert complete"
        );
        Ok(stats)
    }
}
