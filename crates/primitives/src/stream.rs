//! Stream: a double-ended sequence stored as object properties
//!
//! ## Layout
//!
//! - `head`: index of the first element (goes negative after `unshift`)
//! - `size`: number of elements
//! - `<index>`: one property per element, named by its absolute index
//!
//! Logical position `i` lives at absolute index `head + i`, so pushing and
//! shifting never renumber existing elements. Every element write goes
//! through the property log, which makes a stream revertible like any other
//! object.

use std::sync::Arc;

use koya_core::{KoyaResult, ObjectRef, RowId, Value};
use koya_engine::{Store, Transaction};
use tracing::debug;

use crate::facade::{check_tagged, create_tagged};

pub(crate) const HEAD: &str = "head";
pub(crate) const SIZE: &str = "size";

/// Class tag of stream objects.
pub const STREAM_CLASS: &str = "stream";

/// Double-ended sequence of values.
///
/// # Example
///
/// ```ignore
/// let stream = Stream::create(&store)?;
/// stream.push(1)?;
/// stream.push(2)?;
/// stream.unshift(0)?;
/// assert_eq!(stream.to_vec()?, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
/// assert_eq!(stream.get(-1)?, Some(Value::Int(2)));
/// ```
#[derive(Clone, Debug)]
pub struct Stream {
    store: Arc<Store>,
    reference: ObjectRef,
}

pub(crate) struct Bounds {
    pub(crate) head: i64,
    pub(crate) size: i64,
}

impl Bounds {
    /// Absolute index of logical position `index`; negative counts from the end.
    pub(crate) fn resolve(&self, index: i64) -> Option<i64> {
        let index = if index < 0 { self.size + index } else { index };
        (0..self.size).contains(&index).then(|| self.head + index)
    }
}

pub(crate) fn bounds(txn: &Transaction<'_>, rowid: RowId) -> KoyaResult<Bounds> {
    Ok(Bounds {
        head: txn.get_as::<i64>(rowid, HEAD)?.unwrap_or(0),
        size: txn.get_as::<i64>(rowid, SIZE)?.unwrap_or(0),
    })
}

pub(crate) fn save(txn: &Transaction<'_>, rowid: RowId, before: &Bounds, after: &Bounds) -> KoyaResult<()> {
    if before.head != after.head {
        txn.set_property(rowid, HEAD, after.head)?;
    }
    if before.size != after.size {
        txn.set_property(rowid, SIZE, after.size)?;
    }
    Ok(())
}

pub(crate) fn fetch(txn: &Transaction<'_>, rowid: RowId, index: i64) -> KoyaResult<Option<Value>> {
    txn.get_property(rowid, &index.to_string())
}

impl Stream {
    /// Create an empty stream.
    pub fn create(store: &Arc<Store>) -> KoyaResult<Self> {
        let reference = store.transaction(|txn| {
            let reference = create_tagged(txn, STREAM_CLASS)?;
            txn.set_property(reference.rowid, HEAD, 0)?;
            txn.set_property(reference.rowid, SIZE, 0)?;
            Ok(reference)
        })?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// Open an existing stream.
    pub fn open(store: &Arc<Store>, reference: ObjectRef) -> KoyaResult<Self> {
        check_tagged(store, reference, STREAM_CLASS)?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// The stream object's reference.
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    fn rowid(&self) -> RowId {
        self.reference.rowid
    }

    /// Append at the end.
    pub fn push(&self, value: impl Into<Value>) -> KoyaResult<()> {
        let value = value.into();
        self.store.transaction(|txn| {
            let before = bounds(txn, self.rowid())?;
            txn.set_property(self.rowid(), &(before.head + before.size).to_string(), value)?;
            let after = Bounds {
                head: before.head,
                size: before.size + 1,
            };
            save(txn, self.rowid(), &before, &after)
        })
    }

    /// Prepend at the front.
    pub fn unshift(&self, value: impl Into<Value>) -> KoyaResult<()> {
        let value = value.into();
        self.store.transaction(|txn| {
            let before = bounds(txn, self.rowid())?;
            let after = Bounds {
                head: before.head - 1,
                size: before.size + 1,
            };
            txn.set_property(self.rowid(), &after.head.to_string(), value)?;
            save(txn, self.rowid(), &before, &after)
        })
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> KoyaResult<Option<Value>> {
        self.store.transaction(|txn| {
            let before = bounds(txn, self.rowid())?;
            if before.size <= 0 {
                return Ok(None);
            }
            let index = before.head + before.size - 1;
            let value = fetch(txn, self.rowid(), index)?;
            txn.delete_property(self.rowid(), &index.to_string())?;
            let after = Bounds {
                head: before.head,
                size: before.size - 1,
            };
            save(txn, self.rowid(), &before, &after)?;
            Ok(value)
        })
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> KoyaResult<Option<Value>> {
        self.store.transaction(|txn| {
            let before = bounds(txn, self.rowid())?;
            if before.size <= 0 {
                return Ok(None);
            }
            let value = fetch(txn, self.rowid(), before.head)?;
            txn.delete_property(self.rowid(), &before.head.to_string())?;
            let after = Bounds {
                head: before.head + 1,
                size: before.size - 1,
            };
            save(txn, self.rowid(), &before, &after)?;
            Ok(value)
        })
    }

    /// Element at `index`; negative indices count from the end.
    pub fn get(&self, index: i64) -> KoyaResult<Option<Value>> {
        self.store.transaction(|txn| {
            let bounds = bounds(txn, self.rowid())?;
            match bounds.resolve(index) {
                Some(absolute) => fetch(txn, self.rowid(), absolute),
                None => Ok(None),
            }
        })
    }

    /// `len` positions starting at `start`; positions past either end read as `None`.
    pub fn range(&self, start: i64, len: usize) -> KoyaResult<Vec<Option<Value>>> {
        self.store.transaction(|txn| {
            let txn = &*txn;
            let bounds = bounds(txn, self.rowid())?;
            (start..start.saturating_add(len as i64))
                .map(|index| match bounds.resolve(index) {
                    Some(absolute) => fetch(txn, self.rowid(), absolute),
                    None => Ok(None),
                })
                .collect()
        })
    }

    /// Every element, first to last.
    pub fn to_vec(&self) -> KoyaResult<Vec<Value>> {
        self.store.transaction(|txn| {
            let bounds = bounds(txn, self.rowid())?;
            let mut out = Vec::with_capacity(bounds.size.max(0) as usize);
            for index in bounds.head..bounds.head + bounds.size {
                if let Some(value) = fetch(txn, self.rowid(), index)? {
                    out.push(value);
                }
            }
            Ok(out)
        })
    }

    /// Replace the contents with `values`.
    pub fn replace<I, V>(&self, values: I) -> KoyaResult<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.store.transaction(|txn| {
            let before = bounds(txn, self.rowid())?;
            for index in before.head..before.head + before.size {
                txn.delete_property(self.rowid(), &index.to_string())?;
            }
            let head = before.head + before.size;
            let mut size = 0;
            for value in values {
                txn.set_property(self.rowid(), &(head + size).to_string(), value)?;
                size += 1;
            }
            debug!(target: "koya::primitives", stream = %self.reference, dropped = before.size, size, "Stream replaced");
            save(txn, self.rowid(), &before, &Bounds { head, size })
        })
    }

    /// Number of elements
    pub fn len(&self) -> KoyaResult<usize> {
        self.store
            .transaction(|txn| Ok(bounds(txn, self.rowid())?.size.max(0) as usize))
    }

    /// Whether the stream has no elements.
    pub fn is_empty(&self) -> KoyaResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> (Arc<Store>, Stream) {
        let store = Store::ephemeral().unwrap();
        let stream = Stream::create(&store).unwrap();
        store.set("stream", stream.reference()).unwrap();
        (store, stream)
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    #[test]
    fn test_push_pop_shift_unshift() {
        let (_store, s) = stream();
        s.push(1).unwrap();
        s.push(2).unwrap();
        s.unshift(0).unwrap();
        assert_eq!(s.to_vec().unwrap(), ints(&[0, 1, 2]));
        assert_eq!(s.len().unwrap(), 3);

        assert_eq!(s.pop().unwrap(), Some(Value::Int(2)));
        assert_eq!(s.shift().unwrap(), Some(Value::Int(0)));
        assert_eq!(s.to_vec().unwrap(), ints(&[1]));
        assert_eq!(s.shift().unwrap(), Some(Value::Int(1)));
        assert_eq!(s.pop().unwrap(), None);
        assert_eq!(s.shift().unwrap(), None);
        assert!(s.is_empty().unwrap());
    }

    #[test]
    fn test_negative_indexing_and_range() {
        let (_store, s) = stream();
        for v in 10..15 {
            s.push(v).unwrap();
        }
        assert_eq!(s.get(0).unwrap(), Some(Value::Int(10)));
        assert_eq!(s.get(-1).unwrap(), Some(Value::Int(14)));
        assert_eq!(s.get(-5).unwrap(), Some(Value::Int(10)));
        assert_eq!(s.get(-6).unwrap(), None);
        assert_eq!(s.get(5).unwrap(), None);

        assert_eq!(
            s.range(3, 4).unwrap(),
            vec![Some(Value::Int(13)), Some(Value::Int(14)), None, None]
        );
        assert_eq!(
            s.range(-2, 2).unwrap(),
            vec![Some(Value::Int(13)), Some(Value::Int(14))]
        );
        assert!(s.range(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_replace_drops_old_elements() {
        let (_store, s) = stream();
        s.push(1).unwrap();
        s.unshift(0).unwrap();
        s.replace(vec![7, 8, 9]).unwrap();
        assert_eq!(s.to_vec().unwrap(), ints(&[7, 8, 9]));
        assert_eq!(s.get(0).unwrap(), Some(Value::Int(7)));
    }

    #[test]
    fn test_bookkeeping_is_not_object_fields() {
        let (store, s) = stream();
        s.push(1).unwrap();
        s.unshift(0).unwrap();
        let rowid = s.reference().rowid;
        let (names, fields) = store
            .transaction(|txn| Ok((txn.property_names(rowid)?, txn.fields(rowid)?)))
            .unwrap();
        assert!(fields.is_empty());
        assert_eq!(names, vec!["-1", "0", "head", "size"]);
    }

    #[test]
    fn test_open_checks_class() {
        let (store, s) = stream();
        assert!(Stream::open(&store, s.reference()).is_ok());
        assert!(Stream::open(&store, store.root()).is_err());
    }
}
