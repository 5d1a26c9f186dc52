//! Collection types for Koya
//!
//! Every collection is a stateless facade: an `Arc<Store>` plus the
//! reference of the object that holds its data as properties. Each method
//! runs as a transaction, joining the caller's transaction when there is one,
//! so several collection operations compose atomically:
//!
//! ```rust,ignore
//! store.transaction(|_| {
//!     let item = queue.shift()?;
//!     archive.push(item.unwrap_or(Value::Int(0)))?;
//!     Ok(())
//! })?;
//! ```
//!
//! - **Stream**: double-ended sequence with negative indexing
//! - **LogStream**: append-only timestamped stream, optionally capped
//! - **Dict**: string-keyed map
//! - **Set** / **OrderedSet**: object membership
//! - **CellList** / **Cell**: doubly linked list of cell objects
//!
//! Collections are ordinary objects: they survive garbage collection only
//! while reachable from the root or pinned, and revert with the rest of the
//! store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell_list;
pub mod dict;
mod facade;
pub mod log_stream;
pub mod set;
pub mod stream;

pub use cell_list::{Cell, CellList, CELL_CLASS, CELL_LIST_CLASS};
pub use dict::{Dict, DICT_CLASS};
pub use log_stream::{LogStream, LOG_STREAM_CLASS};
pub use set::{OrderedSet, Set, ORDERED_SET_CLASS, SET_CLASS};
pub use stream::{Stream, STREAM_CLASS};
