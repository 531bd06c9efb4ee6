#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dealer_kernel_contracts::history::TxId;
use dealer_kernel_contracts::{ContractViolation, MonotonicTimeNs};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::repo::{StateEntry, StoreCursor};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("store unavailable during {op}: {reason}")]
    Unavailable { op: &'static str, reason: String },
    #[error("out-of-order replay for key {key}: {reason}")]
    OutOfOrderReplay { key: String, reason: &'static str },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

/// One committed version of a key. Deletions carry an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyModification {
    pub tx_id: TxId,
    pub timestamp: MonotonicTimeNs,
    pub value: Vec<u8>,
    pub is_delete: bool,
}

/// In-memory versioned key-value store: current value per key plus an
/// append-only version log per key.
#[derive(Debug, Default)]
pub struct VersionedKvStore {
    world_state: BTreeMap<String, Vec<u8>>,
    history: BTreeMap<String, Vec<KeyModification>>,
    tx_ids: BTreeSet<TxId>,
    commit_seq: u64,
    last_commit_at: MonotonicTimeNs,
    open_cursors: AtomicUsize,
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::ContractViolation(
            ContractViolation::InvalidValue {
                field: "state_key",
                reason: "must not be empty",
            },
        ));
    }
    Ok(())
}

fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn tx_id_for(seq: u64, key: &str, value: &[u8], is_delete: bool) -> Result<TxId, StorageError> {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_be_bytes());
    hasher.update(key.as_bytes());
    hasher.update([0u8, u8::from(is_delete)]);
    hasher.update(value);
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Ok(TxId::new(hex)?)
}

impl VersionedKvStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        Ok(self.world_state.get(key).cloned())
    }

    pub fn put(&mut self, key: &str, value: Vec<u8>) -> Result<TxId, StorageError> {
        let modification = self.stage_put(key, value)?;
        let tx_id = modification.tx_id.clone();
        self.apply_modification(key, modification)?;
        Ok(tx_id)
    }

    /// Removes the live value. The deletion is recorded even when the key has
    /// no live value.
    pub fn delete(&mut self, key: &str) -> Result<TxId, StorageError> {
        let modification = self.stage_delete(key)?;
        let tx_id = modification.tx_id.clone();
        self.apply_modification(key, modification)?;
        Ok(tx_id)
    }

    /// Builds the version the next `put` of `key` would commit, without
    /// committing it.
    pub fn stage_put(&self, key: &str, value: Vec<u8>) -> Result<KeyModification, StorageError> {
        validate_key(key)?;
        if value.is_empty() {
            return Err(StorageError::ContractViolation(
                ContractViolation::InvalidValue {
                    field: "state_value",
                    reason: "must not be empty",
                },
            ));
        }
        self.next_modification(key, value, false)
    }

    /// Builds the deletion version the next `delete` of `key` would commit.
    pub fn stage_delete(&self, key: &str) -> Result<KeyModification, StorageError> {
        validate_key(key)?;
        self.next_modification(key, Vec::new(), true)
    }

    /// Snapshot of live keys in `[start, end)`; empty bounds are open.
    pub fn scan(
        &self,
        start: &str,
        end: &str,
    ) -> Result<SnapshotCursor<'_, StateEntry>, StorageError> {
        let rows = if !start.is_empty() && !end.is_empty() && start >= end {
            Vec::new()
        } else {
            let lower = if start.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Included(start)
            };
            let upper = if end.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded(end)
            };
            self.world_state
                .range::<str, _>((lower, upper))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Ok(SnapshotCursor::open(&self.open_cursors, rows))
    }

    pub fn history_stream(
        &self,
        key: &str,
    ) -> Result<SnapshotCursor<'_, KeyModification>, StorageError> {
        validate_key(key)?;
        let rows = self.key_modifications(key).to_vec();
        Ok(SnapshotCursor::open(&self.open_cursors, rows))
    }

    pub fn key_modifications(&self, key: &str) -> &[KeyModification] {
        self.history.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Commits a staged or journaled version, keeping its transaction id and
    /// commit time. Versions must arrive in commit order.
    pub fn apply_modification(
        &mut self,
        key: &str,
        modification: KeyModification,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        if modification.timestamp <= self.last_commit_at {
            return Err(StorageError::OutOfOrderReplay {
                key: key.to_string(),
                reason: "timestamp must be after the last commit",
            });
        }
        if self.tx_ids.contains(&modification.tx_id) {
            return Err(StorageError::OutOfOrderReplay {
                key: key.to_string(),
                reason: "transaction id already committed",
            });
        }
        if modification.is_delete != modification.value.is_empty() {
            return Err(StorageError::ContractViolation(
                ContractViolation::InvalidValue {
                    field: "key_modification.value",
                    reason: "must be empty exactly when the version is a deletion",
                },
            ));
        }

        if modification.is_delete {
            self.world_state.remove(key);
        } else {
            self.world_state
                .insert(key.to_string(), modification.value.clone());
        }
        self.commit_seq = self.commit_seq.saturating_add(1);
        self.commit(key, modification);
        Ok(())
    }

    pub fn open_cursor_count(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    pub fn live_key_count(&self) -> usize {
        self.world_state.len()
    }

    fn next_modification(
        &self,
        key: &str,
        value: Vec<u8>,
        is_delete: bool,
    ) -> Result<KeyModification, StorageError> {
        let seq = self.commit_seq.saturating_add(1);
        let tx_id = tx_id_for(seq, key, &value, is_delete)?;
        let timestamp = MonotonicTimeNs(
            wall_clock_ns().max(self.last_commit_at.0.saturating_add(1)),
        );
        Ok(KeyModification {
            tx_id,
            timestamp,
            value,
            is_delete,
        })
    }

    fn commit(&mut self, key: &str, modification: KeyModification) {
        self.last_commit_at = modification.timestamp;
        self.tx_ids.insert(modification.tx_id.clone());
        self.history
            .entry(key.to_string())
            .or_default()
            .push(modification);
    }
}

struct CursorLease<'a> {
    open_cursors: &'a AtomicUsize,
}

impl Drop for CursorLease<'_> {
    fn drop(&mut self) {
        self.open_cursors.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cursor over rows copied out of the store when it was opened.
pub struct SnapshotCursor<'a, T> {
    rows: std::vec::IntoIter<T>,
    lease: Option<CursorLease<'a>>,
}

impl<'a, T> SnapshotCursor<'a, T> {
    fn open(open_cursors: &'a AtomicUsize, rows: Vec<T>) -> Self {
        open_cursors.fetch_add(1, Ordering::SeqCst);
        Self {
            rows: rows.into_iter(),
            lease: Some(CursorLease { open_cursors }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.lease.is_some()
    }
}

impl<T> Iterator for SnapshotCursor<'_, T> {
    type Item = Result<T, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lease.as_ref()?;
        match self.rows.next() {
            Some(row) => Some(Ok(row)),
            None => {
                self.close();
                None
            }
        }
    }
}

impl<T> StoreCursor for SnapshotCursor<'_, T> {
    fn close(&mut self) {
        self.rows = Vec::new().into_iter();
        self.lease = None;
    }
}
