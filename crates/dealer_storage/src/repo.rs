#![forbid(unsafe_code)]

use crate::kv::{KeyModification, StorageError, VersionedKvStore};

/// One live `(key, value)` pair produced by a range scan.
pub type StateEntry = (String, Vec<u8>);

/// Open handle over a store sequence. Dropping the cursor releases the handle;
/// `close` releases it early and is idempotent.
pub trait StoreCursor: Iterator {
    fn close(&mut self);
}

pub type StateCursor<'a> = Box<dyn StoreCursor<Item = Result<StateEntry, StorageError>> + 'a>;
pub type HistoryCursor<'a> =
    Box<dyn StoreCursor<Item = Result<KeyModification, StorageError>> + 'a>;

/// Typed interface of a transactional, versioned key-value store.
///
/// Every call is atomic on its own. Commits are totally ordered by the store and
/// each key keeps its full version log, including deletions.
pub trait VersionedStore {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    fn del_state(&mut self, key: &str) -> Result<(), StorageError>;

    /// Live keys in `[start, end)` in lexicographic order. An empty bound is open.
    fn state_by_range<'a>(
        &'a self,
        start: &str,
        end: &str,
    ) -> Result<StateCursor<'a>, StorageError>;

    /// Every committed version of `key`, oldest first.
    fn history_for_key<'a>(&'a self, key: &str) -> Result<HistoryCursor<'a>, StorageError>;
}

impl VersionedStore for VersionedKvStore {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.get(key)
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.put(key, value).map(|_| ())
    }

    fn del_state(&mut self, key: &str) -> Result<(), StorageError> {
        self.delete(key).map(|_| ())
    }

    fn state_by_range<'a>(
        &'a self,
        start: &str,
        end: &str,
    ) -> Result<StateCursor<'a>, StorageError> {
        Ok(Box::new(self.scan(start, end)?))
    }

    fn history_for_key<'a>(&'a self, key: &str) -> Result<HistoryCursor<'a>, StorageError> {
        Ok(Box::new(self.history_stream(key)?))
    }
}
