//! LogStream: a bounded, timestamped stream
//!
//! Uses the same `head`/`size` layout as [`Stream`](crate::Stream). Each item
//! `<index>` has a sibling `<index>.time` holding the revision of the
//! transaction that pushed it. With a limit set, a push that grows the log past
//! it drops the oldest items in the same transaction.
//!
//! Items only enter at the end and leave from the front; there is no
//! `unshift` or `pop`.

use std::sync::Arc;

use koya_core::{KoyaError, KoyaResult, ObjectRef, Revision, RowId, Value};
use koya_engine::{Store, Transaction};
use tracing::debug;

use crate::facade::{check_tagged, create_tagged};
use crate::stream::{bounds, fetch, save, Bounds, HEAD, SIZE};

/// Class tag of log stream objects
pub const LOG_STREAM_CLASS: &str = "log_stream";

const LIMIT: &str = "limit";

fn time_name(index: i64) -> String {
    format!("{}.time", index)
}

fn fetch_time(txn: &Transaction<'_>, rowid: RowId, index: i64) -> KoyaResult<Option<Revision>> {
    txn.get_as::<String>(rowid, &time_name(index))?
        .map(|text| text.parse::<Revision>())
        .transpose()
}

fn fetch_entry(
    txn: &Transaction<'_>,
    rowid: RowId,
    index: i64,
) -> KoyaResult<Option<(Revision, Value)>> {
    let time = fetch_time(txn, rowid, index)?;
    let value = fetch(txn, rowid, index)?;
    Ok(time.zip(value))
}

/// Append-only log of values, optionally capped at a number of items
///
/// # Example
///
/// ```ignore
/// let log = LogStream::create(&store, Some(2))?;
/// log.push("a")?;
/// log.push("b")?;
/// log.push("c")?;
/// assert_eq!(log.to_vec()?, vec![Value::from("b"), Value::from("c")]);
/// ```
#[derive(Clone, Debug)]
pub struct LogStream {
    store: Arc<Store>,
    reference: ObjectRef,
}

impl LogStream {
    /// Create an empty log; `None` keeps every item.
    pub fn create(store: &Arc<Store>, limit: Option<usize>) -> KoyaResult<Self> {
        check_limit(limit)?;
        let reference = store.transaction(|txn| {
            let reference = create_tagged(txn, LOG_STREAM_CLASS)?;
            txn.set_property(reference.rowid, HEAD, 0)?;
            txn.set_property(reference.rowid, SIZE, 0)?;
            if let Some(limit) = limit {
                txn.set_property(reference.rowid, LIMIT, limit as i64)?;
            }
            Ok(reference)
        })?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// Open an existing log
    pub fn open(store: &Arc<Store>, reference: ObjectRef) -> KoyaResult<Self> {
        check_tagged(store, reference, LOG_STREAM_CLASS)?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// The log object's reference
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    fn rowid(&self) -> RowId {
        self.reference.rowid
    }

    /// Current item limit
    pub fn limit(&self) -> KoyaResult<Option<usize>> {
        self.store.transaction(|txn| {
            Ok(txn
                .get_as::<i64>(self.rowid(), LIMIT)?
                .map(|limit| limit.max(0) as usize))
        })
    }

    /// Change the limit. Takes effect at the next push.
    pub fn set_limit(&self, limit: Option<usize>) -> KoyaResult<()> {
        check_limit(limit)?;
        self.store.transaction(|txn| match limit {
            Some(limit) => txn.set_property(self.rowid(), LIMIT, limit as i64),
            None => txn.delete_property(self.rowid(), LIMIT),
        })
    }

    /// Append `value`, stamped with this transaction's revision, then drop
    /// the oldest items while the log is over its limit.
    ///
    /// Returns the number of items dropped.
    pub fn push(&self, value: impl Into<Value>) -> KoyaResult<usize> {
        let value = value.into();
        self.store.transaction(|txn| {
            let rowid = self.rowid();
            let before = bounds(txn, rowid)?;
            let index = before.head + before.size;
            let stamp = txn.revision()?;
            txn.set_property(rowid, &index.to_string(), value)?;
            txn.set_property(rowid, &time_name(index), stamp.to_string())?;

            let mut after = Bounds {
                head: before.head,
                size: before.size + 1,
            };
            let limit = txn.get_as::<i64>(rowid, LIMIT)?;
            let mut dropped = 0;
            if let Some(limit) = limit {
                while after.size > limit {
                    remove_item(txn, rowid, after.head)?;
                    after.head += 1;
                    after.size -= 1;
                    dropped += 1;
                }
            }
            if dropped > 0 {
                debug!(target: "koya::primitives", log = %self.reference, dropped, "Log trimmed to limit");
            }
            save(txn, rowid, &before, &after)?;
            Ok(dropped)
        })
    }

    /// Remove and return the oldest item with its timestamp
    pub fn shift(&self) -> KoyaResult<Option<(Revision, Value)>> {
        self.store.transaction(|txn| {
            let rowid = self.rowid();
            let before = bounds(txn, rowid)?;
            if before.size <= 0 {
                return Ok(None);
            }
            let entry = fetch_entry(txn, rowid, before.head)?;
            remove_item(txn, rowid, before.head)?;
            let after = Bounds {
                head: before.head + 1,
                size: before.size - 1,
            };
            save(txn, rowid, &before, &after)?;
            Ok(entry)
        })
    }

    /// Item at `index` with its timestamp; negative indices count from the end
    pub fn get(&self, index: i64) -> KoyaResult<Option<(Revision, Value)>> {
        self.store.transaction(|txn| {
            let rowid = self.rowid();
            match bounds(txn, rowid)?.resolve(index) {
                Some(absolute) => fetch_entry(txn, rowid, absolute),
                None => Ok(None),
            }
        })
    }

    /// Every item with its timestamp, oldest first
    pub fn entries(&self) -> KoyaResult<Vec<(Revision, Value)>> {
        self.store.transaction(|txn| {
            let rowid = self.rowid();
            let bounds = bounds(txn, rowid)?;
            let mut out = Vec::with_capacity(bounds.size.max(0) as usize);
            for index in bounds.head..bounds.head + bounds.size {
                if let Some(entry) = fetch_entry(txn, rowid, index)? {
                    out.push(entry);
                }
            }
            Ok(out)
        })
    }

    /// Every value, oldest first
    pub fn to_vec(&self) -> KoyaResult<Vec<Value>> {
        Ok(self.entries()?.into_iter().map(|(_, value)| value).collect())
    }

    /// Number of items
    pub fn len(&self) -> KoyaResult<usize> {
        self.store
            .transaction(|txn| Ok(bounds(txn, self.rowid())?.size.max(0) as usize))
    }

    /// Whether the log has no items
    pub fn is_empty(&self) -> KoyaResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn check_limit(limit: Option<usize>) -> KoyaResult<()> {
    if limit == Some(0) {
        return Err(KoyaError::invalid_input("log limit must be at least 1"));
    }
    Ok(())
}

fn remove_item(txn: &Transaction<'_>, rowid: RowId, index: i64) -> KoyaResult<()> {
    txn.delete_property(rowid, &index.to_string())?;
    txn.delete_property(rowid, &time_name(index))
}
