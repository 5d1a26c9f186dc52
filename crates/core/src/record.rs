//! The `version` record

use serde::{Deserialize, Serialize};

use crate::error::{KoyaError, KoyaResult};
use crate::types::{Revision, RowId};

/// Current on-disk layout version
pub const FORMAT_VERSION: u32 = 1;

/// Store-wide metadata kept under the `version` key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Layout version the store was written with
    pub format: u32,
    /// Whether property mutations are logged
    pub use_log: bool,
    /// Revision of the last committed mutation
    pub revision: Revision,
    /// Rowid of the root object
    pub root: RowId,
    /// Revision of the last log compaction, if any
    pub compacted_at: Option<Revision>,
}

impl VersionRecord {
    /// Record for a freshly initialized store
    pub fn new(use_log: bool, root: RowId) -> Self {
        VersionRecord {
            format: FORMAT_VERSION,
            use_log,
            revision: Revision::ZERO,
            root,
            compacted_at: None,
        }
    }

    /// Serialize for the backend
    pub fn to_bytes(&self) -> KoyaResult<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Deserialize, rejecting layouts newer than this build understands
    pub fn from_bytes(bytes: &[u8]) -> KoyaResult<Self> {
        let record: VersionRecord = rmp_serde::from_slice(bytes)?;
        if record.format > FORMAT_VERSION {
            return Err(KoyaError::corruption(format!(
                "store format {} is newer than supported format {}",
                record.format, FORMAT_VERSION
            )));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_record_roundtrip() {
        let mut record = VersionRecord::new(true, RowId::new(1));
        record.revision = Revision::from_ticks(123);
        record.compacted_at = Some(Revision::from_ticks(100));
        let back = VersionRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_newer_format_rejected() {
        let mut record = VersionRecord::new(false, RowId::new(1));
        record.format = FORMAT_VERSION + 1;
        let err = VersionRecord::from_bytes(&record.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, KoyaError::Corruption(_)));
    }
}
