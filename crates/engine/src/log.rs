//! Property log and revision index
//!
//! Every logged mutation is stored under `P.<revision>@<rowid>@<name>` and
//! marks `revision.<revision>`. Revision text is fixed width, so a prefix scan
//! of `P.` returns the log in commit order.

use koya_core::keys::{self, LogKey};
use koya_core::{scan_prefix, scan_prefix_keys, KoyaResult, Revision, RowId, StoredProperty, Value};

use crate::transaction::Transaction;

impl<'s> Transaction<'s> {
    /// Revision of the last committed mutation.
    pub fn current_revision(&self) -> KoyaResult<Revision> {
        Ok(self.record()?.revision)
    }

    /// Logged revisions, most recent first.
    pub fn revisions(&self) -> KoyaResult<Vec<Revision>> {
        self.check()?;
        let mut revisions = scan_prefix_keys(self.backend(), keys::REVISION_PREFIX)?
            .iter()
            .map(|key| keys::parse_revision_key(key))
            .collect::<KoyaResult<Vec<_>>>()?;
        revisions.reverse();
        Ok(revisions)
    }

    /// Revision of the last log compaction, before which revert is impossible.
    pub fn compaction_horizon(&self) -> KoyaResult<Option<Revision>> {
        Ok(self.record()?.compacted_at)
    }

    /// The whole log in commit order.
    pub(crate) fn log_scan(&self) -> KoyaResult<Vec<(LogKey, StoredProperty)>> {
        self.check()?;
        scan_prefix(self.backend(), keys::LOG_PREFIX)?
            .into_iter()
            .map(|(key, bytes)| Ok((keys::parse_log_key(&key)?, StoredProperty::from_bytes(&bytes)?)))
            .collect()
    }

    /// History of one property, oldest first; `None` marks a deletion.
    pub fn log_entries(&self, rowid: RowId, name: &str) -> KoyaResult<Vec<(Revision, Option<Value>)>> {
        let store = self.store_id();
        self.log_scan()?
            .into_iter()
            .filter(|(key, _)| key.rowid == rowid && key.name == name)
            .map(|(key, stored)| Ok((key.revision, stored.decode(store)?)))
            .collect()
    }
}
