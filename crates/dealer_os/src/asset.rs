#![forbid(unsafe_code)]

use dealer_kernel_contracts::asset::{AssetFields, AssetRecord, DealerId};
use dealer_storage::{StateCursor, StoreCursor, VersionedStore};
use tracing::{debug, info};

use crate::error::AssetError;

/// Create/read/update/delete and enumeration of dealer accounts against an
/// explicitly supplied store.
pub trait AssetLifecycle<S: VersionedStore + ?Sized> {
    fn exists(&self, store: &S, dealer_id: &DealerId) -> Result<bool, AssetError>;

    fn create(
        &self,
        store: &mut S,
        dealer_id: &DealerId,
        fields: AssetFields,
    ) -> Result<(), AssetError>;

    fn read(&self, store: &S, dealer_id: &DealerId) -> Result<AssetRecord, AssetError>;

    /// Stored bytes of the live record, unparsed.
    fn read_raw(&self, store: &S, dealer_id: &DealerId) -> Result<Vec<u8>, AssetError>;

    /// Replaces every field of the live record.
    fn update(
        &self,
        store: &mut S,
        dealer_id: &DealerId,
        fields: AssetFields,
    ) -> Result<(), AssetError>;

    fn delete(&self, store: &mut S, dealer_id: &DealerId) -> Result<(), AssetError>;

    fn list_all<'a>(&self, store: &'a S) -> Result<AssetIter<'a>, AssetError>;

    fn list_all_records(&self, store: &S) -> Result<Vec<AssetRecord>, AssetError> {
        self.list_all(store)?.collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssetLifecycleManager;

impl AssetLifecycleManager {
    pub fn new() -> Self {
        Self
    }

    fn write_record<S: VersionedStore + ?Sized>(
        store: &mut S,
        dealer_id: &DealerId,
        fields: AssetFields,
    ) -> Result<(), AssetError> {
        let record = AssetRecord::v1(dealer_id.clone(), fields)?;
        let bytes = record.to_json_bytes()?;
        store.put_state(dealer_id.as_str(), bytes)?;
        Ok(())
    }
}

impl<S: VersionedStore + ?Sized> AssetLifecycle<S> for AssetLifecycleManager {
    fn exists(&self, store: &S, dealer_id: &DealerId) -> Result<bool, AssetError> {
        let value = store.get_state(dealer_id.as_str())?;
        Ok(value.is_some_and(|v| !v.is_empty()))
    }

    fn create(
        &self,
        store: &mut S,
        dealer_id: &DealerId,
        fields: AssetFields,
    ) -> Result<(), AssetError> {
        if self.exists(store, dealer_id)? {
            return Err(AssetError::AlreadyExists {
                dealer_id: dealer_id.clone(),
            });
        }
        Self::write_record(store, dealer_id, fields)?;
        info!(dealer_id = %dealer_id, "asset created");
        Ok(())
    }

    fn read(&self, store: &S, dealer_id: &DealerId) -> Result<AssetRecord, AssetError> {
        let bytes = self.read_raw(store, dealer_id)?;
        AssetRecord::from_json_bytes(&bytes).map_err(|err| AssetError::DecodeError {
            dealer_id: dealer_id.as_str().to_string(),
            reason: err.to_string(),
        })
    }

    fn read_raw(&self, store: &S, dealer_id: &DealerId) -> Result<Vec<u8>, AssetError> {
        debug!(dealer_id = %dealer_id, "reading asset");
        match store.get_state(dealer_id.as_str())? {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(AssetError::NotFound {
                dealer_id: dealer_id.clone(),
            }),
        }
    }

    fn update(
        &self,
        store: &mut S,
        dealer_id: &DealerId,
        fields: AssetFields,
    ) -> Result<(), AssetError> {
        if !self.exists(store, dealer_id)? {
            return Err(AssetError::NotFound {
                dealer_id: dealer_id.clone(),
            });
        }
        Self::write_record(store, dealer_id, fields)?;
        info!(dealer_id = %dealer_id, "asset overwritten");
        Ok(())
    }

    fn delete(&self, store: &mut S, dealer_id: &DealerId) -> Result<(), AssetError> {
        if !self.exists(store, dealer_id)? {
            return Err(AssetError::NotFound {
                dealer_id: dealer_id.clone(),
            });
        }
        store.del_state(dealer_id.as_str())?;
        info!(dealer_id = %dealer_id, "asset deleted");
        Ok(())
    }

    fn list_all<'a>(&self, store: &'a S) -> Result<AssetIter<'a>, AssetError> {
        debug!("scanning all assets");
        let cursor = store.state_by_range("", "")?;
        Ok(AssetIter::new(cursor))
    }
}

/// Lazily decoded full-range scan. Stops at the first malformed value and
/// releases the scan on every exit path.
pub struct AssetIter<'a> {
    cursor: Option<StateCursor<'a>>,
}

impl<'a> AssetIter<'a> {
    fn new(cursor: StateCursor<'a>) -> Self {
        Self {
            cursor: Some(cursor),
        }
    }

    fn release(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
    }
}

impl Iterator for AssetIter<'_> {
    type Item = Result<AssetRecord, AssetError>;

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
            Some(Ok((key, value))) => match AssetRecord::from_json_bytes(&value) {
                Ok(record) => Some(Ok(record)),
                Err(err) => {
                    self.release();
                    Some(Err(AssetError::DecodeError {
                        dealer_id: key,
                        reason: err.to_string(),
                    }))
                }
            },
        }
    }
}

impl Drop for AssetIter<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
