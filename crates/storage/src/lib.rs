//! Storage backends for Koya
//!
//! This crate implements the [`Backend`](koya_core::Backend) contract twice:
//! - MemoryBackend: BTreeMap medium shareable between handles
//! - FileBackend: one snapshot file guarded by an `fs2` lock file
//!
//! Both apply writes in place under an undo [`Journal`], and both wait on a
//! contended medium according to a [`BusyPolicy`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod busy;
pub mod file;
pub mod format;
pub mod journal;
pub mod memory;

pub use busy::{BusyPolicy, DEFAULT_POLLING_INTERVAL};
pub use file::FileBackend;
pub use journal::Journal;
pub use memory::{MemoryBackend, MemoryMedium};
