//! Single-file backend
//!
//! The whole ordered map lives in one snapshot file (see [`crate::format`]).
//! Each handle keeps a decoded copy in memory and works on it under an
//! exclusive `fs2` lock on `<file>.lock`:
//!
//! - `begin` takes the lock (polling per the busy policy) and reloads the copy
//!   if another handle committed a newer generation.
//! - Writes go to the copy and are journaled.
//! - `commit` rewrites the file (temp file, fsync, rename) if anything was
//!   written, then releases the lock.
//! - `abort` replays the journal and releases the lock.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use koya_core::{Backend, KoyaError, KoyaResult, Seek};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::busy::BusyPolicy;
use crate::format;
use crate::journal::Journal;
use crate::memory::seek_in;

struct FileState {
    data: BTreeMap<String, Vec<u8>>,
    generation: u64,
    journal: Option<Journal>,
    lock: Option<File>,
}

/// Backend persisting to one snapshot file.
pub struct FileBackend {
    path: PathBuf,
    lock_path: PathBuf,
    policy: BusyPolicy,
    state: Mutex<FileState>,
}

impl FileBackend {
    /// Open (or create) the snapshot file at `path`.
    pub fn open(path: impl AsRef<Path>, policy: BusyPolicy) -> KoyaResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock_path = lock_path_for(&path);
        let backend = FileBackend {
            path,
            lock_path,
            policy,
            state: Mutex::new(FileState {
                data: BTreeMap::new(),
                generation: 0,
                journal: None,
                lock: None,
            }),
        };

        let lock = backend.acquire_lock()?;
        let loaded = backend.reload_if_stale(&mut backend.state.lock());
        release_lock(&lock);
        loaded?;

        let state = backend.state.lock();
        info!(
            target: "koya::storage",
            path = %backend.path.display(),
            generation = state.generation,
            keys = state.data.len(),
            "File backend opened"
        );
        drop(state);
        Ok(backend)
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation of the copy this handle holds.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn acquire_lock(&self) -> KoyaResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        let contended = fs2::lock_contended_error();
        self.policy.acquire("file", || match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(())),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == contended.raw_os_error() =>
            {
                Ok(None)
            }
            Err(e) => Err(KoyaError::Io(e)),
        })?;
        Ok(file)
    }

    fn reload_if_stale(&self, state: &mut FileState) -> KoyaResult<()> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut header = [0u8; format::HEADER_LEN];
        file.read_exact(&mut header)?;
        let generation = format::peek_generation(&header)?;
        if generation == state.generation {
            return Ok(());
        }
        let mut bytes = header.to_vec();
        file.read_to_end(&mut bytes)?;
        let (generation, data) = format::decode(&bytes)?;
        debug!(target: "koya::storage", generation, keys = data.len(), "Snapshot reloaded");
        state.generation = generation;
        state.data = data;
        Ok(())
    }

    fn persist(&self, state: &FileState, generation: u64) -> KoyaResult<()> {
        let bytes = format::encode(generation, &state.data)?;
        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            if parent.exists() && !parent.as_os_str().is_empty() {
                let dir = File::open(parent)?;
                dir.sync_all()?;
            }
        }
        Ok(())
    }

    fn write(&self, key: &str, value: Option<&[u8]>) -> KoyaResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let journal = state
            .journal
            .as_mut()
            .ok_or_else(|| KoyaError::invalid_operation("write outside a backend transaction"))?;
        if !journal.has_touched(key) {
            journal.record(key, state.data.get(key).cloned());
        }
        match value {
            Some(v) => {
                state.data.insert(key.to_string(), v.to_vec());
            }
            None => {
                state.data.remove(key);
            }
        }
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn release_lock(lock: &File) {
    if let Err(e) = FileExt::unlock(lock) {
        warn!(target: "koya::storage", error = %e, "Failed to release file lock");
    }
}

impl Backend for FileBackend {
    fn begin(&self) -> KoyaResult<()> {
        if self.state.lock().journal.is_some() {
            return Err(KoyaError::invalid_operation(
                "backend transaction already open on this handle",
            ));
        }
        let lock = self.acquire_lock()?;
        let mut state = self.state.lock();
        if let Err(e) = self.reload_if_stale(&mut state) {
            release_lock(&lock);
            return Err(e);
        }
        state.journal = Some(Journal::new());
        state.lock = Some(lock);
        Ok(())
    }

    fn commit(&self) -> KoyaResult<()> {
        let mut state = self.state.lock();
        let journal = state
            .journal
            .take()
            .ok_or_else(|| KoyaError::invalid_operation("commit without a backend transaction"))?;
        let result = if journal.is_empty() {
            Ok(())
        } else {
            let generation = state.generation + 1;
            match self.persist(&state, generation) {
                Ok(()) => {
                    state.generation = generation;
                    debug!(target: "koya::storage", generation, writes = journal.len(), "Snapshot written");
                    Ok(())
                }
                Err(e) => {
                    warn!(target: "koya::storage", error = %e, "Snapshot write failed, rolling back");
                    journal.rollback(&mut state.data);
                    Err(e)
                }
            }
        };
        if let Some(lock) = state.lock.take() {
            release_lock(&lock);
        }
        result
    }

    fn abort(&self) -> KoyaResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let journal = state
            .journal
            .take()
            .ok_or_else(|| KoyaError::invalid_operation("abort without a backend transaction"))?;
        journal.rollback(&mut state.data);
        if let Some(lock) = state.lock.take() {
            release_lock(&lock);
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().journal.is_some()
    }

    fn get(&self, key: &str) -> KoyaResult<Option<Vec<u8>>> {
        Ok(self.state.lock().data.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> KoyaResult<()> {
        self.write(key, Some(value))
    }

    fn delete(&self, key: &str) -> KoyaResult<()> {
        self.write(key, None)
    }

    fn seek(&self, key: &str, mode: Seek) -> KoyaResult<Option<(String, Vec<u8>)>> {
        Ok(seek_in(&self.state.lock().data, key, mode))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(journal) = state.journal.take() {
            journal.rollback(&mut state.data);
        }
        if let Some(lock) = state.lock.take() {
            release_lock(&lock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_policy() -> BusyPolicy {
        BusyPolicy::default()
            .with_polling_interval(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_commit_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("koya.db");
        {
            let backend = FileBackend::open(&path, fast_policy()).unwrap();
            backend.begin().unwrap();
            backend.put("m.1", b"root").unwrap();
            backend.commit().unwrap();
            assert_eq!(backend.generation(), 1);
        }
        let backend = FileBackend::open(&path, fast_policy()).unwrap();
        assert_eq!(backend.get("m.1").unwrap(), Some(b"root".to_vec()));
    }

    #[test]
    fn test_abort_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("koya.db");
        let backend = FileBackend::open(&path, fast_policy()).unwrap();
        backend.begin().unwrap();
        backend.put("a", b"1").unwrap();
        backend.abort().unwrap();
        assert_eq!(backend.get("a").unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_read_only_commit_keeps_generation() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path().join("koya.db"), fast_policy()).unwrap();
        backend.begin().unwrap();
        backend.commit().unwrap();
        assert_eq!(backend.generation(), 0);
    }

    #[test]
    fn test_second_handle_sees_commit_on_begin() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("koya.db");
        let first = FileBackend::open(&path, fast_policy()).unwrap();
        let second = FileBackend::open(&path, fast_policy()).unwrap();

        first.begin().unwrap();
        first.put("k", b"v1").unwrap();
        first.commit().unwrap();

        second.begin().unwrap();
        assert_eq!(second.get("k").unwrap(), Some(b"v1".to_vec()));
        second.put("k", b"v2").unwrap();
        second.commit().unwrap();

        first.begin().unwrap();
        assert_eq!(first.get("k").unwrap(), Some(b"v2".to_vec()));
        first.commit().unwrap();
    }

    #[test]
    fn test_lock_contention_reports_busy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("koya.db");
        let first = FileBackend::open(&path, fast_policy()).unwrap();
        let second = FileBackend::open(&path, fast_policy()).unwrap();
        first.begin().unwrap();
        assert!(second.begin().unwrap_err().is_busy());
        first.commit().unwrap();
        second.begin().unwrap();
        second.abort().unwrap();
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("koya.db");
        fs::write(&path, b"KOYA garbage that is long enough").unwrap();
        assert!(FileBackend::open(&path, fast_policy()).is_err());
    }

    static_assertions::assert_impl_all!(FileBackend: Send, Sync);
}
