//! Store engine for Koya
//!
//! This crate turns a key-value [`Backend`](koya_core::Backend) into an
//! object store:
//! - Store: open/bootstrap, root properties, configuration
//! - Transactions: reentrant, closure-scoped, all-or-nothing
//! - Identity: rowids, class tags, properties, pins
//! - Cache: per-transaction context plus a revision-stamped snapshot
//! - Property log, revisions and revert-to-time
//! - Mark-sweep GC with log compaction
//! - Typed objects: `Persistent`, `ClassRegistry`, `Handle<T>`
//!
//! Everything else (encoding, key layout, backends) lives in `koya-core` and
//! `koya-storage`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod gc;
pub mod handle;
mod identity;
mod log;
pub mod object;
pub mod revert;
pub mod store;
pub mod transaction;

pub use cache::{CacheEntry, ObjectCache};
pub use config::{StoreConfig, CONFIG_FILE_NAME, DATA_FILE_NAME};
pub use gc::GcStats;
pub use handle::Handle;
pub use object::{ClassRegistry, Fields, Materializer, Model, Persistent, Root};
pub use revert::RevertStats;
pub use store::{Store, StoreBuilder};
pub use transaction::Transaction;
