//! Backend abstraction
//!
//! The engine runs one implementation of its transaction, log and GC
//! algorithms against [`Backend`]. A backend only needs ordered string keys, a
//! single positioning primitive ([`Backend::seek`]) and an undoable transaction.
//! [`Cursor`] and [`scan_prefix`] are built once on top of `seek`, so adapters
//! stay thin.
//!
//! Thread safety: all methods take `&self` and must be callable from any
//! thread (requires Send + Sync). The engine serializes transactional work
//! per store; a backend serializes different stores sharing one medium.

use crate::error::KoyaResult;

/// Positioning mode for [`Backend::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    /// First key `>= key`.
    AtOrAfter,
    /// First key `> key`.
    After,
    /// Last key `< key`.
    Before,
}

/// Ordered key-value medium with undoable transactions.
pub trait Backend: Send + Sync {
    /// Open a transaction
    ///
    /// Blocks (polling per the backend's busy policy) while another handle
    /// on the same medium holds one.
    ///
    /// # Errors
    ///
    /// `Busy` when the busy policy times out, `InvalidOperation` when a
    /// transaction is already open on this handle.
    fn begin(&self) -> KoyaResult<()>;

    /// Make the transaction's writes durable and release the medium.
    fn commit(&self) -> KoyaResult<()>;

    /// Undo the transaction's writes and release the medium.
    fn abort(&self) -> KoyaResult<()>;

    /// Whether this handle has an open transaction.
    fn in_transaction(&self) -> bool;

    /// Read one key
    fn get(&self, key: &str) -> KoyaResult<Option<Vec<u8>>>;

    /// Write one key
    fn put(&self, key: &str, value: &[u8]) -> KoyaResult<()>;

    /// Remove one key; absent keys are not an error.
    fn delete(&self, key: &str) -> KoyaResult<()>;

    /// Position relative to `key` and return the entry found there.
    fn seek(&self, key: &str, mode: Seek) -> KoyaResult<Option<(String, Vec<u8>)>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Ordered cursor over a backend.
///
/// Holds the entry it is positioned on; movement re-seeks relative to that
/// key, so deleting entries underneath the cursor is safe.
pub struct Cursor<'a> {
    backend: &'a dyn Backend,
    current: Option<(String, Vec<u8>)>,
}

impl<'a> Cursor<'a> {
    /// Unpositioned cursor
    pub fn new(backend: &'a dyn Backend) -> Self {
        Cursor {
            backend,
            current: None,
        }
    }

    /// Position on the first key `>= key`.
    pub fn jump(&mut self, key: &str) -> KoyaResult<bool> {
        self.current = self.backend.seek(key, Seek::AtOrAfter)?;
        Ok(self.current.is_some())
    }

    /// Advance to the next key.
    pub fn next(&mut self) -> KoyaResult<bool> {
        if let Some((key, _)) = self.current.take() {
            self.current = self.backend.seek(&key, Seek::After)?;
        }
        Ok(self.current.is_some())
    }

    /// Step back to the previous key.
    pub fn prev(&mut self) -> KoyaResult<bool> {
        if let Some((key, _)) = self.current.take() {
            self.current = self.backend.seek(&key, Seek::Before)?;
        }
        Ok(self.current.is_some())
    }

    /// Current key
    pub fn key(&self) -> Option<&str> {
        self.current.as_ref().map(|(k, _)| k.as_str())
    }

    /// Current value
    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }

    /// Whether the cursor is positioned and its key starts with `prefix`.
    pub fn within(&self, prefix: &str) -> bool {
        self.key().map_or(false, |k| k.starts_with(prefix))
    }

    /// Delete the current entry and advance.
    pub fn remove(&mut self) -> KoyaResult<bool> {
        if let Some((key, _)) = self.current.take() {
            self.backend.delete(&key)?;
            self.current = self.backend.seek(&key, Seek::After)?;
        }
        Ok(self.current.is_some())
    }
}

/// Every entry whose key starts with `prefix`, in key order.
pub fn scan_prefix(backend: &dyn Backend, prefix: &str) -> KoyaResult<Vec<(String, Vec<u8>)>> {
    let mut out = Vec::new();
    let mut cursor = Cursor::new(backend);
    cursor.jump(prefix)?;
    while cursor.within(prefix) {
        if let Some(entry) = cursor.current.clone() {
            out.push(entry);
        }
        cursor.next()?;
    }
    Ok(out)
}

/// Keys only
pub fn scan_prefix_keys(backend: &dyn Backend, prefix: &str) -> KoyaResult<Vec<String>> {
    Ok(scan_prefix(backend, prefix)?
        .into_iter()
        .map(|(k, _)| k)
        .collect())
}

/// Delete every entry under `prefix`; returns how many were removed.
pub fn remove_prefix(backend: &dyn Backend, prefix: &str) -> KoyaResult<usize> {
    let mut removed = 0;
    let mut cursor = Cursor::new(backend);
    cursor.jump(prefix)?;
    while cursor.within(prefix) {
        cursor.remove()?;
        removed += 1;
    }
    Ok(removed)
}
