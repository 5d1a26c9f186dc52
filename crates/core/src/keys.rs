//! Persisted key layout
//!
//! | Key | Meaning |
//! |---|---|
//! | `version` | [`VersionRecord`](crate::VersionRecord) |
//! | `koya_id` | rowid counter |
//! | `m.<rowid>` | class tag |
//! | `p.<rowid>@<name>` | current property value |
//! | `P.<revision>@<rowid>@<name>` | property log entry |
//! | `revision.<revision>` | revision marker |
//! | `lock.<rowid>` | GC pin |
//!
//! Property names may themselves start with `@` (object fields), so parsers
//! split on the first separators only.

use crate::error::{KoyaError, KoyaResult};
use crate::types::{Revision, RowId};

/// Key holding the version record
pub const VERSION: &str = "version";
/// Key holding the rowid counter
pub const ROWID_COUNTER: &str = "koya_id";
/// Prefix of class-tag keys
pub const CLASS_PREFIX: &str = "m.";
/// Prefix of current-property keys
pub const PROPERTY_PREFIX: &str = "p.";
/// Prefix of property-log keys
pub const LOG_PREFIX: &str = "P.";
/// Prefix of revision markers
pub const REVISION_PREFIX: &str = "revision.";
/// Prefix of lock markers
pub const LOCK_PREFIX: &str = "lock.";

const SEP: char = '@';

/// `m.<rowid>`
pub fn class_key(rowid: RowId) -> String {
    format!("{}{}", CLASS_PREFIX, rowid)
}

/// `p.<rowid>@<name>`
pub fn property_key(rowid: RowId, name: &str) -> String {
    format!("{}{}{}{}", PROPERTY_PREFIX, rowid, SEP, name)
}

/// `p.<rowid>@`, the prefix shared by all properties of one object
pub fn property_prefix(rowid: RowId) -> String {
    format!("{}{}{}", PROPERTY_PREFIX, rowid, SEP)
}

/// `P.<revision>@<rowid>@<name>`
pub fn log_key(revision: Revision, rowid: RowId, name: &str) -> String {
    format!("{}{}{}{}{}{}", LOG_PREFIX, revision, SEP, rowid, SEP, name)
}

/// `P.<revision>@`, all log entries of one revision
pub fn log_prefix(revision: Revision) -> String {
    format!("{}{}{}", LOG_PREFIX, revision, SEP)
}

/// `revision.<revision>`
pub fn revision_key(revision: Revision) -> String {
    format!("{}{}", REVISION_PREFIX, revision)
}

/// `lock.<rowid>`
pub fn lock_key(rowid: RowId) -> String {
    format!("{}{}", LOCK_PREFIX, rowid)
}

fn strip<'a>(key: &'a str, prefix: &str) -> KoyaResult<&'a str> {
    key.strip_prefix(prefix)
        .ok_or_else(|| KoyaError::corruption(format!("key '{}' lacks prefix '{}'", key, prefix)))
}

fn split(rest: &str, key: &str) -> KoyaResult<(String, String)> {
    rest.split_once(SEP)
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .ok_or_else(|| KoyaError::corruption(format!("malformed key '{}'", key)))
}

/// Parse `m.<rowid>`
pub fn parse_class_key(key: &str) -> KoyaResult<RowId> {
    strip(key, CLASS_PREFIX)?.parse()
}

/// Parse `p.<rowid>@<name>`
pub fn parse_property_key(key: &str) -> KoyaResult<(RowId, String)> {
    let (rowid, name) = split(strip(key, PROPERTY_PREFIX)?, key)?;
    Ok((rowid.parse()?, name))
}

/// A decoded `P.*` key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogKey {
    /// Revision of the mutation
    pub revision: Revision,
    /// Mutated object
    pub rowid: RowId,
    /// Mutated property
    pub name: String,
}

/// Parse `P.<revision>@<rowid>@<name>`
pub fn parse_log_key(key: &str) -> KoyaResult<LogKey> {
    let (revision, rest) = split(strip(key, LOG_PREFIX)?, key)?;
    let (rowid, name) = split(&rest, key)?;
    Ok(LogKey {
        revision: revision.parse()?,
        rowid: rowid.parse()?,
        name,
    })
}

/// Parse `revision.<revision>`
pub fn parse_revision_key(key: &str) -> KoyaResult<Revision> {
    strip(key, REVISION_PREFIX)?.parse()
}

/// Parse `lock.<rowid>`
pub fn parse_lock_key(key: &str) -> KoyaResult<RowId> {
    strip(key, LOCK_PREFIX)?.parse()
}
