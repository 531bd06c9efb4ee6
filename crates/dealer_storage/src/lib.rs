#![forbid(unsafe_code)]

pub mod kv;
pub mod repo;

pub use kv::{KeyModification, StorageError, VersionedKvStore};
pub use repo::{HistoryCursor, StateCursor, StateEntry, StoreCursor, VersionedStore};
