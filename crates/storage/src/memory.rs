//! In-memory backend
//!
//! A [`MemoryMedium`] is an ordered map shared by any number of
//! [`MemoryBackend`] handles, standing in for a database file that several
//! stores open at once. One handle at a time may hold a transaction on the
//! medium; the others poll per their [`BusyPolicy`].

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use koya_core::{Backend, KoyaError, KoyaResult, Seek};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::busy::BusyPolicy;
use crate::journal::Journal;

/// Locate an entry relative to `key` in an ordered map.
pub(crate) fn seek_in(
    data: &BTreeMap<String, Vec<u8>>,
    key: &str,
    mode: Seek,
) -> Option<(String, Vec<u8>)> {
    let found = match mode {
        Seek::AtOrAfter => data
            .range::<str, _>((Bound::Included(key), Bound::Unbounded))
            .next(),
        Seek::After => data
            .range::<str, _>((Bound::Excluded(key), Bound::Unbounded))
            .next(),
        Seek::Before => data
            .range::<str, _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back(),
    };
    found.map(|(k, v)| (k.clone(), v.clone()))
}

struct MediumInner {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    held: Mutex<bool>,
}

/// Shared in-memory storage
#[derive(Clone)]
pub struct MemoryMedium {
    inner: Arc<MediumInner>,
}

impl MemoryMedium {
    /// Empty medium
    pub fn new() -> Self {
        MemoryMedium {
            inner: Arc::new(MediumInner {
                data: RwLock::new(BTreeMap::new()),
                held: Mutex::new(false),
            }),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    /// Whether the medium holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.data.read().is_empty()
    }

    /// Copy of every key, for inspection in tests and tools.
    pub fn keys(&self) -> Vec<String> {
        self.inner.data.read().keys().cloned().collect()
    }

    fn try_hold(&self) -> bool {
        let mut held = self.inner.held.lock();
        if *held {
            false
        } else {
            *held = true;
            true
        }
    }

    fn release(&self) {
        *self.inner.held.lock() = false;
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

/// One handle onto a [`MemoryMedium`]
pub struct MemoryBackend {
    medium: MemoryMedium,
    policy: BusyPolicy,
    journal: Mutex<Option<Journal>>,
}

impl MemoryBackend {
    /// Backend over a private medium.
    pub fn new() -> Self {
        Self::with_medium(MemoryMedium::new())
    }

    /// Backend over a shared medium.
    pub fn with_medium(medium: MemoryMedium) -> Self {
        MemoryBackend {
            medium,
            policy: BusyPolicy::default(),
            journal: Mutex::new(None),
        }
    }

    /// Replace the busy policy.
    pub fn with_policy(mut self, policy: BusyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The underlying medium
    pub fn medium(&self) -> &MemoryMedium {
        &self.medium
    }

    fn write(&self, key: &str, value: Option<&[u8]>) -> KoyaResult<()> {
        let mut journal = self.journal.lock();
        let journal = journal
            .as_mut()
            .ok_or_else(|| KoyaError::invalid_operation("write outside a backend transaction"))?;
        let mut data = self.medium.inner.data.write();
        if !journal.has_touched(key) {
            journal.record(key, data.get(key).cloned());
        }
        match value {
            Some(v) => {
                data.insert(key.to_string(), v.to_vec());
            }
            None => {
                data.remove(key);
            }
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn begin(&self) -> KoyaResult<()> {
        let mut journal = self.journal.lock();
        if journal.is_some() {
            return Err(KoyaError::invalid_operation(
                "backend transaction already open on this handle",
            ));
        }
        self.policy
            .acquire("memory", || Ok(self.medium.try_hold().then_some(())))?;
        *journal = Some(Journal::new());
        trace!(target: "koya::storage", "Memory transaction opened");
        Ok(())
    }

    fn commit(&self) -> KoyaResult<()> {
        let journal = self
            .journal
            .lock()
            .take()
            .ok_or_else(|| KoyaError::invalid_operation("commit without a backend transaction"))?;
        trace!(target: "koya::storage", writes = journal.len(), "Memory transaction committed");
        self.medium.release();
        Ok(())
    }

    fn abort(&self) -> KoyaResult<()> {
        let journal = self
            .journal
            .lock()
            .take()
            .ok_or_else(|| KoyaError::invalid_operation("abort without a backend transaction"))?;
        trace!(target: "koya::storage", writes = journal.len(), "Memory transaction rolled back");
        journal.rollback(&mut self.medium.inner.data.write());
        self.medium.release();
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.journal.lock().is_some()
    }

    fn get(&self, key: &str) -> KoyaResult<Option<Vec<u8>>> {
        Ok(self.medium.inner.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> KoyaResult<()> {
        self.write(key, Some(value))
    }

    fn delete(&self, key: &str) -> KoyaResult<()> {
        self.write(key, None)
    }

    fn seek(&self, key: &str, mode: Seek) -> KoyaResult<Option<(String, Vec<u8>)>> {
        Ok(seek_in(&self.medium.inner.data.read(), key, mode))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        if let Some(journal) = self.journal.get_mut().take() {
            journal.rollback(&mut self.medium.inner.data.write());
            self.medium.release();
        }
    }
}
