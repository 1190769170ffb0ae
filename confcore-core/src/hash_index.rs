//! C1: a fixed-bucket associative store keyed by `\0`-terminated
//! byte-strings, value an opaque byte-copy.
//!
//! The original design calls for a chained hash table with no ordering
//! guarantees across keys; `dashmap`'s sharded hash map gives us exactly
//! that shape (and the concurrent access the event loop's multiple
//! connections need) without hand-rolling bucket chaining.

use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashIndexError {
    #[error("value must be non-null with len > 0, or null with len == 0")]
    MismatchedValueLen,
}

/// Associative store keyed by string, value an opaque byte-copy.
#[derive(Debug, Default)]
pub struct HashIndex {
    buckets: DashMap<String, Vec<u8>>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self { buckets: DashMap::new() }
    }

    /// Copies `bytes` in; replaces an existing value in place rather than
    /// re-linking the key.
    pub fn insert(&self, key: &str, bytes: Option<&[u8]>, len: usize) -> Result<(), HashIndexError> {
        match bytes {
            Some(b) if len == b.len() => {
                self.buckets.insert(key.to_string(), b.to_vec());
                Ok(())
            }
            None if len == 0 => {
                self.buckets.insert(key.to_string(), Vec::new());
                Ok(())
            }
            _ => Err(HashIndexError::MismatchedValueLen),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        self.buckets.get(key).map(|v| v.clone())
    }

    pub fn delete(&self, key: &str) -> bool {
        self.buckets.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.buckets.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_value_in_place() {
        let idx = HashIndex::new();
        idx.insert("db:running", Some(b"v1"), 2).unwrap();
        idx.insert("db:running", Some(b"v2-longer"), 9).unwrap();
        assert_eq!(idx.lookup("db:running"), Some(b"v2-longer".to_vec()));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn mismatched_value_len_is_rejected() {
        let idx = HashIndex::new();
        assert_eq!(idx.insert("k", None, 3), Err(HashIndexError::MismatchedValueLen));
        assert_eq!(idx.insert("k", Some(b"abc"), 0), Err(HashIndexError::MismatchedValueLen));
    }

    #[test]
    fn delete_and_lookup_of_missing_key() {
        let idx = HashIndex::new();
        idx.insert("a", Some(b"1"), 1).unwrap();
        assert!(idx.delete("a"));
        assert!(!idx.delete("a"));
        assert_eq!(idx.lookup("a"), None);
    }

    #[test]
    fn keys_lists_all_entries() {
        let idx = HashIndex::new();
        idx.insert("a", Some(b"1"), 1).unwrap();
        idx.insert("b", Some(b"2"), 1).unwrap();
        let mut keys = idx.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
