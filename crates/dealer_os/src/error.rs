#![forbid(unsafe_code)]

use dealer_kernel_contracts::asset::DealerId;
use dealer_kernel_contracts::ContractViolation;
use dealer_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssetError {
    #[error("the asset {dealer_id} does not exist")]
    NotFound { dealer_id: DealerId },
    #[error("the asset {dealer_id} already exists")]
    AlreadyExists { dealer_id: DealerId },
    #[error("stored value for {dealer_id} is not a valid asset record: {reason}")]
    DecodeError { dealer_id: String, reason: String },
    #[error("failed to read from world state: {0}")]
    StoreUnavailable(#[from] StorageError),
    #[error("asset record rejected: {0}")]
    InvalidRecord(#[from] ContractViolation),
}

impl AssetError {
    pub fn kind(&self) -> &'static str {
        match self {
            AssetError::NotFound { .. } => "NOT_FOUND",
            AssetError::AlreadyExists { .. } => "ALREADY_EXISTS",
            AssetError::DecodeError { .. } => "DECODE_ERROR",
            AssetError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AssetError::InvalidRecord(_) => "INVALID_RECORD",
        }
    }
}
