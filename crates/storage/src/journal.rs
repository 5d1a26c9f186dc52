//! Undo journal for backend transactions
//!
//! Backends apply writes in place and remember each key's prior value the
//! first time it is touched. Abort replays the journal in reverse.

use std::collections::{BTreeMap, HashSet};

/// Prior values of keys written by one transaction.
#[derive(Debug, Default)]
pub struct Journal {
    undo: Vec<(String, Option<Vec<u8>>)>,
    touched: HashSet<String>,
}

impl Journal {
    /// Empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `prior` as the value of `key` before this transaction.
    ///
    /// Only the first call per key is kept.
    pub fn record(&mut self, key: &str, prior: Option<Vec<u8>>) {
        if self.touched.insert(key.to_string()) {
            self.undo.push((key.to_string(), prior));
        }
    }

    /// Whether `key` was already recorded.
    pub fn has_touched(&self, key: &str) -> bool {
        self.touched.contains(key)
    }

    /// Whether any write happened.
    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Number of distinct keys written.
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    /// Restore every recorded key in `data`.
    pub fn rollback(self, data: &mut BTreeMap<String, Vec<u8>>) {
        for (key, prior) in self.undo.into_iter().rev() {
            match prior {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_restores_prior_state() {
        let mut data = BTreeMap::new();
        data.insert("a".to_string(), b"1".to_vec());

        let mut journal = Journal::new();
        journal.record("a", data.get("a").cloned());
        data.insert("a".to_string(), b"2".to_vec());
        journal.record("b", data.get("b").cloned());
        data.insert("b".to_string(), b"3".to_vec());
        journal.record("a", data.get("a").cloned());
        data.remove("a");

        assert_eq!(journal.len(), 2);
        journal.rollback(&mut data);
        assert_eq!(data.get("a"), Some(&b"1".to_vec()));
        assert!(!data.contains_key("b"));
    }

    #[test]
    fn test_empty_journal() {
        let journal = Journal::new();
        assert!(journal.is_empty());
        assert!(!journal.has_touched("x"));
    }
}
