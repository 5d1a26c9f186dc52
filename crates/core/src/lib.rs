//! Core types and traits for Koya
//!
//! This crate defines the foundations shared by every other crate:
//! - RowId, StoreId, ObjectRef: object identity
//! - Revision: timestamp token ordering commits and log entries
//! - Value, StoredProperty: property values and their `(kind, payload)` codec
//! - keys: the persisted key layout
//! - VersionRecord: store-wide metadata
//! - Backend, Cursor: the ordered key-value contract
//! - KoyaError: the error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keys;
pub mod record;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{KoyaError, KoyaResult};
pub use record::{VersionRecord, FORMAT_VERSION};
pub use traits::{remove_prefix, scan_prefix, scan_prefix_keys, Backend, Cursor, Seek};
pub use types::{ObjectRef, Revision, RowId, StoreId, FIELD_MARKER, ROOT_CLASS};
pub use value::{FromValue, PropertyKind, StoredProperty, Value};
