#![forbid(unsafe_code)]

use dealer_kernel_contracts::asset::{AssetRecord, DealerId};
use dealer_kernel_contracts::history::HistoryEntry;
use dealer_storage::{HistoryCursor, KeyModification, StoreCursor, VersionedStore};
use tracing::debug;

use crate::error::AssetError;

/// Audit trail of one dealer account, in the commit order recorded by the store.
pub trait AssetHistory<S: VersionedStore + ?Sized> {
    fn history_of<'a>(
        &self,
        store: &'a S,
        dealer_id: &DealerId,
    ) -> Result<HistoryIter<'a>, AssetError>;

    fn history_entries(
        &self,
        store: &S,
        dealer_id: &DealerId,
    ) -> Result<Vec<HistoryEntry>, AssetError> {
        self.history_of(store, dealer_id)?.collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryReconstructor;

impl HistoryReconstructor {
    pub fn new() -> Self {
        Self
    }
}

impl<S: VersionedStore + ?Sized> AssetHistory<S> for HistoryReconstructor {
    fn history_of<'a>(
        &self,
        store: &'a S,
        dealer_id: &DealerId,
    ) -> Result<HistoryIter<'a>, AssetError> {
        debug!(dealer_id = %dealer_id, "opening asset history");
        let cursor = store.history_for_key(dealer_id.as_str())?;
        Ok(HistoryIter {
            dealer_id: dealer_id.clone(),
            cursor: Some(cursor),
        })
    }
}

/// Projects each stored version into a snapshot or a tombstone. The version
/// stream is released on exhaustion, on the first failure, or on drop.
pub struct HistoryIter<'a> {
    dealer_id: DealerId,
    cursor: Option<HistoryCursor<'a>>,
}

impl HistoryIter<'_> {
    fn release(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
    }

    fn project(&self, version: KeyModification) -> Result<HistoryEntry, AssetError> {
        // Deletions carry no payload; the placeholder keeps only the key.
        let record = if version.is_delete || version.value.is_empty() {
            AssetRecord::tombstone(self.dealer_id.clone())
        } else {
            AssetRecord::from_json_bytes(&version.value).map_err(|err| {
                AssetError::DecodeError {
                    dealer_id: self.dealer_id.as_str().to_string(),
                    reason: format!("version {}: {err}", version.tx_id),
                }
            })?
        };
        if version.is_delete {
            Ok(HistoryEntry::tombstone(version.tx_id, version.timestamp, record))
        } else {
            Ok(HistoryEntry::snapshot(version.tx_id, version.timestamp, record))
        }
    }
}

impl Iterator for HistoryIter<'_> {
    type Item = Result<HistoryEntry, AssetError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.cursor.as_mut()?.next();
        match next {
            None => {
                self.release();
                None
            }
            Some(Err(err)) => {
                self.release();
                Some(Err(AssetError::StoreUnavailable(err)))
            }
            Some(Ok(version)) => {
                let entry = self.project(version);
                if entry.is_err() {
                    self.release();
                }
                Some(entry)
            }
        }
    }
}

impl Drop for HistoryIter<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
