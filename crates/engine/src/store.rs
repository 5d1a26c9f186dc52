//! The store: one handle onto a backend
//!
//! # Three Ways to Open a Store
//!
//! ```ignore
//! use koya_engine::Store;
//!
//! // 1. Data directory with koya.toml and koya.db
//! let store = Store::open("/data/app")?;
//!
//! // 2. Builder for custom backends and registered classes
//! let store = Store::builder()
//!     .backend(MemoryBackend::with_medium(medium.clone()))
//!     .register::<Account>()
//!     .open()?;
//!
//! // 3. Ephemeral (no files, testing)
//! let store = Store::ephemeral()?;
//! ```
//!
//! Opening initializes an empty medium: the version record, the rowid counter
//! and the root object (always the first rowid) are written in one transaction.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use koya_core::keys;
use koya_core::{
    scan_prefix_keys, Backend, FromValue, KoyaError, KoyaResult, ObjectRef, Revision, RowId,
    StoreId, Value, VersionRecord, ROOT_CLASS,
};
use koya_storage::{FileBackend, MemoryBackend};
use parking_lot::ReentrantMutex;
use tracing::{info, warn};

use crate::config::{StoreConfig, CONFIG_FILE_NAME, DATA_FILE_NAME};
use crate::handle::Handle;
use crate::object::{ClassRegistry, Persistent};
use crate::transaction::TxnState;

/// An open store
pub struct Store {
    id: StoreId,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) state: ReentrantMutex<RefCell<TxnState>>,
    pub(crate) registry: ClassRegistry,
    config: StoreConfig,
    root: RowId,
    use_log: bool,
}

impl Store {
    /// Open the store in a data directory.
    ///
    /// Creates the directory and a default `koya.toml` if missing, then opens
    /// `koya.db` with the settings found there.
    pub fn open<P: AsRef<Path>>(path: P) -> KoyaResult<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&config_path)?;
        let config = StoreConfig::from_file(&config_path)?;

        Self::builder().path(data_dir).config(config).open()
    }

    /// Open the store in a data directory with an explicit configuration.
    ///
    /// The configuration is written to `koya.toml` so later [`Store::open`]
    /// calls pick up the same settings.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> KoyaResult<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        config.validate()?;
        config.write_to_file(&data_dir.join(CONFIG_FILE_NAME))?;

        Self::builder().path(data_dir).config(config).open()
    }

    /// In-memory store with default settings.
    pub fn ephemeral() -> KoyaResult<Arc<Self>> {
        Self::builder().open()
    }

    /// Builder for custom backends, settings and classes.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Identity of this handle.
    pub fn id(&self) -> StoreId {
        self.id
    }

    /// Settings the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether mutations are recorded in the property log.
    pub fn use_log(&self) -> bool {
        self.use_log
    }

    /// Reference to the root object.
    pub fn root(&self) -> ObjectRef {
        ObjectRef::new(self.id, self.root)
    }

    /// Registered classes
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Backend description
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    pub(crate) fn read_record(&self) -> KoyaResult<VersionRecord> {
        let bytes = self
            .backend
            .get(keys::VERSION)?
            .ok_or_else(|| KoyaError::corruption("missing version record"))?;
        VersionRecord::from_bytes(&bytes)
    }

    // ------------------------------------------------------------------------
    // Root properties
    // ------------------------------------------------------------------------

    /// Read a property of the root object.
    pub fn get(&self, name: &str) -> KoyaResult<Option<Value>> {
        self.transaction(|txn| txn.get_property(self.root, name))
    }

    /// Read a typed property of the root object.
    pub fn get_as<T: FromValue>(&self, name: &str) -> KoyaResult<Option<T>> {
        self.transaction(|txn| txn.get_as(self.root, name))
    }

    /// Set a property of the root object.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> KoyaResult<()> {
        let value = value.into();
        self.transaction(|txn| txn.set_property(self.root, name, value))
    }

    /// Delete a property of the root object.
    pub fn delete(&self, name: &str) -> KoyaResult<()> {
        self.transaction(|txn| txn.delete_property(self.root, name))
    }

    /// Names of the root object's properties.
    pub fn names(&self) -> KoyaResult<Vec<String>> {
        self.transaction(|txn| txn.property_names(self.root))
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    /// Create a typed object in its own (or the joined) transaction.
    ///
    /// The handle starts with a snapshot only when the creation committed here.
    pub fn create<T: Persistent>(self: &Arc<Self>, object: T) -> KoyaResult<Handle<T>> {
        let joined = self.in_transaction();
        let reference = self.transaction(|txn| txn.create(&object))?;
        if joined {
            return Ok(Handle::new(Arc::clone(self), reference));
        }
        Ok(Handle::with_snapshot(Arc::clone(self), reference, object))
    }

    /// Create a typed object inside the transaction this thread is running.
    ///
    /// Fails with `TransactionNotFound` outside a transaction.
    pub fn create_in_active<T: Persistent>(self: &Arc<Self>, object: T) -> KoyaResult<Handle<T>> {
        let reference = self.active_transaction(|txn| txn.create(&object))?;
        Ok(Handle::new(Arc::clone(self), reference))
    }

    /// Typed handle onto an existing object.
    pub fn handle<T: Persistent>(self: &Arc<Self>, reference: ObjectRef) -> KoyaResult<Handle<T>> {
        if reference.store != self.id {
            return Err(KoyaError::invalid_input(format!(
                "reference {} belongs to another store",
                reference
            )));
        }
        Ok(Handle::new(Arc::clone(self), reference))
    }

    /// Load a typed copy of an object.
    pub fn load<T: Persistent>(&self, rowid: RowId) -> KoyaResult<T> {
        self.transaction(|txn| txn.load(rowid))
    }

    /// Class tag of an object.
    pub fn get_class(&self, rowid: RowId) -> KoyaResult<String> {
        self.transaction(|txn| txn.get_class(rowid))
    }

    /// Whether an object exists.
    pub fn exists(&self, rowid: RowId) -> KoyaResult<bool> {
        self.transaction(|txn| txn.exists(rowid))
    }

    /// Pin an object against collection; false if already pinned.
    pub fn lock(&self, rowid: RowId) -> KoyaResult<bool> {
        self.transaction(|txn| txn.lock(rowid))
    }

    /// Remove a pin
    pub fn unlock(&self, rowid: RowId) -> KoyaResult<()> {
        self.transaction(|txn| txn.unlock(rowid))
    }

    /// Live objects of one class (runs a GC pass first).
    pub fn extent(&self, class: &str) -> KoyaResult<Vec<ObjectRef>> {
        self.transaction(|txn| txn.extent(class))
    }

    /// Live properties referencing `rowid` (runs a GC pass first).
    pub fn referer(&self, rowid: RowId) -> KoyaResult<Vec<(ObjectRef, String)>> {
        self.transaction(|txn| txn.referer(rowid))
    }

    // ------------------------------------------------------------------------
    // Revisions
    // ------------------------------------------------------------------------

    /// Revision of the last committed mutation.
    pub fn current_revision(&self) -> KoyaResult<Revision> {
        self.transaction(|txn| txn.current_revision())
    }

    /// Logged revisions, most recent first.
    pub fn revisions(&self) -> KoyaResult<Vec<Revision>> {
        self.transaction(|txn| txn.revisions())
    }

    /// Revision of the last log compaction.
    pub fn compaction_horizon(&self) -> KoyaResult<Option<Revision>> {
        self.transaction(|txn| txn.compaction_horizon())
    }

    /// History of one property, oldest first; `None` marks a deletion.
    pub fn log_entries(&self, rowid: RowId, name: &str) -> KoyaResult<Vec<(Revision, Option<Value>)>> {
        self.transaction(|txn| txn.log_entries(rowid, name))
    }

    /// Revert to a wall-clock time (see [`Store::revert_to_revision`]).
    pub fn revert_to(&self, at: DateTime<Utc>) -> KoyaResult<crate::revert::RevertStats> {
        self.revert_to_revision(Revision::from_datetime(at))
    }

    /// Number of class-tagged rowids, live or not yet collected.
    pub fn object_count(&self) -> KoyaResult<usize> {
        self.transaction(|txn| Ok(scan_prefix_keys(txn.backend(), keys::CLASS_PREFIX)?.len()))
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("backend", &self.backend.describe())
            .field("root", &self.root)
            .field("use_log", &self.use_log)
            .finish()
    }
}

/// Write the version record, counter and root object on an empty medium.
fn bootstrap(backend: &dyn Backend, use_log: bool) -> KoyaResult<VersionRecord> {
    backend.begin()?;
    let result = (|| {
        if let Some(bytes) = backend.get(keys::VERSION)? {
            return VersionRecord::from_bytes(&bytes);
        }
        let root = RowId::new(1);
        backend.put(keys::ROWID_COUNTER, root.to_string().as_bytes())?;
        backend.put(&keys::class_key(root), ROOT_CLASS.as_bytes())?;
        let record = VersionRecord::new(use_log, root);
        backend.put(keys::VERSION, &record.to_bytes()?)?;
        info!(target: "koya::store", backend = %backend.describe(), use_log, "Store initialized");
        Ok(record)
    })();
    match result {
        Ok(record) => {
            backend.commit()?;
            Ok(record)
        }
        Err(e) => {
            if let Err(abort) = backend.abort() {
                warn!(target: "koya::store", error = %abort, "Bootstrap rollback failed");
            }
            Err(e)
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Store`]
pub struct StoreBuilder {
    path: Option<PathBuf>,
    backend: Option<Box<dyn Backend>>,
    config: StoreConfig,
    registry: ClassRegistry,
}

impl StoreBuilder {
    /// Builder with defaults: in-memory backend, default config.
    pub fn new() -> Self {
        StoreBuilder {
            path: None,
            backend: None,
            config: StoreConfig::default(),
            registry: ClassRegistry::new(),
        }
    }

    /// Store `koya.db` in this directory.
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use an explicit backend (overrides `path`).
    pub fn backend<B: Backend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Settings
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a persistent class.
    pub fn register<T: Persistent>(mut self) -> Self {
        self.registry.register::<T>();
        self
    }

    /// Open the store
    pub fn open(self) -> KoyaResult<Arc<Store>> {
        self.config.validate()?;
        let backend: Box<dyn Backend> = match (self.backend, &self.path) {
            (Some(backend), _) => backend,
            (None, Some(dir)) => {
                std::fs::create_dir_all(dir)?;
                Box::new(FileBackend::open(
                    dir.join(DATA_FILE_NAME),
                    self.config.busy_policy(),
                )?)
            }
            (None, None) => Box::new(MemoryBackend::new().with_policy(self.config.busy_policy())),
        };

        let record = bootstrap(backend.as_ref(), self.config.use_log)?;
        if record.use_log != self.config.use_log {
            info!(
                target: "koya::store",
                persisted = record.use_log,
                requested = self.config.use_log,
                "Property log setting fixed at creation; using persisted value"
            );
        }

        let store = Store {
            id: StoreId::new(),
            backend,
            state: ReentrantMutex::new(RefCell::new(TxnState::new(self.config.global_cache))),
            registry: self.registry,
            config: self.config,
            root: record.root,
            use_log: record.use_log,
        };
        info!(target: "koya::store", store = %store.id, backend = %store.describe(), "Store opened");
        Ok(Arc::new(store))
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koya_storage::{BusyPolicy, MemoryMedium};
    use tempfile::TempDir;

    #[test]
    fn test_ephemeral_store_has_root() {
        let store = Store::ephemeral().unwrap();
        assert_eq!(store.root().rowid, RowId::new(1));
        assert_eq!(store.get_class(store.root().rowid).unwrap(), ROOT_CLASS);
        assert!(store.use_log());
    }

    #[test]
    fn test_root_properties() {
        let store = Store::ephemeral().unwrap();
        store.set("greeting", "hello").unwrap();
        store.set("count", 3).unwrap();
        assert_eq!(store.get_as::<String>("greeting").unwrap().unwrap(), "hello");
        assert_eq!(store.names().unwrap(), vec!["count", "greeting"]);
        store.delete("count").unwrap();
        assert_eq!(store.get("count").unwrap(), None);
    }

    #[test]
    fn test_second_handle_reuses_initialized_medium() {
        let medium = MemoryMedium::new();
        let first = Store::builder()
            .backend(MemoryBackend::with_medium(medium.clone()))
            .open()
            .unwrap();
        first.set("x", 1).unwrap();
        let second = Store::builder()
            .backend(MemoryBackend::with_medium(medium))
            .open()
            .unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(second.root().rowid, first.root().rowid);
        assert_eq!(second.get_as::<i64>("x").unwrap(), Some(1));
    }

    #[test]
    fn test_persisted_log_flag_wins() {
        let medium = MemoryMedium::new();
        Store::builder()
            .backend(MemoryBackend::with_medium(medium.clone()))
            .config(StoreConfig::default().with_log(false))
            .open()
            .unwrap();
        let reopened = Store::builder()
            .backend(MemoryBackend::with_medium(medium))
            .open()
            .unwrap();
        assert!(!reopened.use_log());
    }

    #[test]
    fn test_open_writes_default_config() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(store.config(), &StoreConfig::default());
        store.set("k", "v").unwrap();
        drop(store);
        assert!(dir.path().join(DATA_FILE_NAME).exists());
        let reopened = Store::open(dir.path()).unwrap();
        assert_eq!(reopened.get_as::<String>("k").unwrap().unwrap(), "v");
    }

    #[test]
    fn test_open_with_config_persists_settings() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default().with_log(false).with_global_cache(false);
        Store::open_with_config(dir.path(), config.clone()).unwrap();
        let reopened = Store::open(dir.path()).unwrap();
        assert_eq!(reopened.config(), &config);
        assert!(!reopened.use_log());
    }

    #[test]
    fn test_handle_rejects_foreign_reference() {
        let store = Store::ephemeral().unwrap();
        let other = Store::ephemeral().unwrap();
        let err = store
            .handle::<crate::object::Root>(other.root())
            .unwrap_err();
        assert!(matches!(err, KoyaError::InvalidInput(_)));
    }

    #[test]
    fn test_corrupt_version_record_releases_medium() {
        let medium = MemoryMedium::new();
        let raw = MemoryBackend::with_medium(medium.clone()).with_policy(
            BusyPolicy::default().with_timeout(std::time::Duration::from_secs(5)),
        );
        raw.begin().unwrap();
        raw.put(keys::VERSION, b"not a record").unwrap();
        raw.commit().unwrap();

        let err = Store::builder()
            .backend(MemoryBackend::with_medium(medium))
            .open()
            .unwrap_err();
        assert!(matches!(err, KoyaError::Serialization(_) | KoyaError::Corruption(_)));
        assert!(!raw.in_transaction());
        raw.begin().unwrap();
        raw.abort().unwrap();
    }

    static_assertions::assert_impl_all!(Store: Send, Sync);
}
