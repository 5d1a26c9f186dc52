//! Identity types: rowids, store identities, object references and revisions
//!
//! All of these appear inside persisted keys, so their `Display` forms are part
//! of the on-disk layout and must stay stable.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{KoyaError, KoyaResult};

/// Class tag reserved for the store's root object
pub const ROOT_CLASS: &str = "root";

/// Prefix marking a property as an object field synchronized by write-back
pub const FIELD_MARKER: char = '@';

// ============================================================================
// RowId
// ============================================================================

/// Persisted handle of one object
///
/// Allocated from the `koya_id` counter, never reused, rendered in decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(u64);

impl RowId {
    /// Wrap a raw counter value
    pub const fn new(raw: u64) -> Self {
        RowId(raw)
    }

    /// Raw counter value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RowId {
    type Err = KoyaError;

    fn from_str(s: &str) -> KoyaResult<Self> {
        s.parse::<u64>()
            .map(RowId)
            .map_err(|_| KoyaError::corruption(format!("invalid rowid '{}'", s)))
    }
}

// ============================================================================
// StoreId / ObjectRef
// ============================================================================

/// Identity of one open store handle
///
/// References carry it so a value from one store cannot be written into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Fresh random identity
    pub fn new() -> Self {
        StoreId(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an object: `(store identity, rowid)`, compared structurally
///
/// A reference may dangle; dereferencing it then fails with
/// [`KoyaError::ObjectNotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Store the reference belongs to
    pub store: StoreId,
    /// Target object
    pub rowid: RowId,
}

impl ObjectRef {
    /// Build a reference
    pub fn new(store: StoreId, rowid: RowId) -> Self {
        ObjectRef { store, rowid }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.rowid)
    }
}

// ============================================================================
// Revision
// ============================================================================

const TICKS_PER_SECOND: u64 = 100_000_000;
const NANOS_PER_TICK: u32 = 10;

/// Timestamp token of a committed transaction
///
/// Counted in 10 ns ticks since the Unix epoch. The textual form is
/// `SSSSSSSSSSS.FFFFFFFF`: fixed width, so lexicographic key order equals
/// chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// The epoch; used before the first commit
    pub const ZERO: Revision = Revision(0);

    /// Width of the textual form
    pub const WIDTH: usize = 20;

    /// Revision from raw ticks
    pub const fn from_ticks(ticks: u64) -> Self {
        Revision(ticks)
    }

    /// Raw ticks
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Floor a timestamp to tick resolution; pre-epoch times clamp to zero
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let secs = at.timestamp();
        if secs < 0 {
            return Revision::ZERO;
        }
        let frac = u64::from(at.timestamp_subsec_nanos() / NANOS_PER_TICK);
        Revision((secs as u64).saturating_mul(TICKS_PER_SECOND).saturating_add(frac))
    }

    /// Timestamp this revision denotes
    pub fn to_datetime(self) -> DateTime<Utc> {
        let secs = (self.0 / TICKS_PER_SECOND) as i64;
        let nanos = (self.0 % TICKS_PER_SECOND) as u32 * NANOS_PER_TICK;
        Utc.timestamp_opt(secs, nanos)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// The next representable revision
    pub fn next(self) -> Self {
        Revision(self.0.saturating_add(1))
    }

    /// Candidate for a new transaction: now, but strictly after `current`
    ///
    /// Keeps revisions increasing when the clock stalls or steps backwards.
    pub fn candidate_after(current: Revision) -> Self {
        Self::now().max(current.next())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:011}.{:08}",
            self.0 / TICKS_PER_SECOND,
            self.0 % TICKS_PER_SECOND
        )
    }
}

impl FromStr for Revision {
    type Err = KoyaError;

    fn from_str(s: &str) -> KoyaResult<Self> {
        let bad = || KoyaError::corruption(format!("invalid revision '{}'", s));
        let (secs, frac) = s.split_once('.').ok_or_else(bad)?;
        if frac.len() != 8 {
            return Err(bad());
        }
        let secs: u64 = secs.parse().map_err(|_| bad())?;
        let frac: u64 = frac.parse().map_err(|_| bad())?;
        secs.checked_mul(TICKS_PER_SECOND)
            .and_then(|ticks| ticks.checked_add(frac))
            .map(Revision)
            .ok_or_else(bad)
    }
}

impl From<DateTime<Utc>> for Revision {
    fn from(at: DateTime<Utc>) -> Self {
        Revision::from_datetime(at)
    }
}
