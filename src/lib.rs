//! Koya - embedded object persistence over an ordered key-value store
//!
//! Objects are rowids with a class tag; their state is a set of named,
//! typed properties. Every change happens inside a transaction, is recorded
//! in a property log, and can be undone by reverting the store to an earlier
//! time. Objects unreachable from the root (or a pin) are collected by a
//! mark-sweep pass.
//!
//! # Quick Start
//!
//! ```ignore
//! use koya::{Store, Value};
//!
//! let store = Store::open("/data/app")?;
//!
//! store.transaction(|txn| {
//!     let root = txn.root()?.rowid;
//!     let n = txn.get_as::<i64>(root, "visits")?.unwrap_or(0);
//!     txn.set_property(root, "visits", n + 1)
//! })?;
//!
//! let before = store.current_revision()?;
//! store.set("visits", 1000)?;
//! store.revert_to_revision(before)?;
//! ```
//!
//! # Layers
//!
//! - [`koya_core`]: values, keys, the `Backend` trait and errors
//! - [`koya_storage`]: in-memory and single-file backends
//! - [`koya_engine`]: store, transactions, cache, log, GC, revert
//! - [`koya_primitives`]: streams, logs, dicts, sets and linked lists

pub use koya_core::{
    Backend, Cursor, FromValue, KoyaError, KoyaResult, ObjectRef, PropertyKind, Revision, RowId,
    Seek, StoreId, StoredProperty, Value, ROOT_CLASS,
};
pub use koya_engine::{
    ClassRegistry, Fields, GcStats, Handle, Model, Persistent, RevertStats, Root, Store,
    StoreBuilder, StoreConfig, Transaction,
};
pub use koya_primitives::{Cell, CellList, Dict, LogStream, OrderedSet, Set, Stream};
pub use koya_storage::{BusyPolicy, FileBackend, MemoryBackend, MemoryMedium};

pub use koya_core as core;
pub use koya_engine as engine;
pub use koya_primitives as primitives;
pub use koya_storage as storage;
