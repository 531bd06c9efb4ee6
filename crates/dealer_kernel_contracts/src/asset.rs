#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, SchemaVersion, Validate};

pub const ASSET_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Store key of one dealer account. Any non-empty string is a valid key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DealerId(String);

impl DealerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for DealerId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "dealer_id",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

impl TryFrom<String> for DealerId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DealerId> for String {
    fn from(value: DealerId) -> Self {
        value.0
    }
}

impl fmt::Display for DealerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied account fields. Create and update always carry the full set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssetFields {
    pub msisdn: String,
    pub mpin: String,
    pub balance: f64,
    pub status: String,
    pub trans_amount: f64,
    pub trans_type: String,
    pub remarks: String,
}

impl Validate for AssetFields {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.balance.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "asset_record.balance",
            });
        }
        if !self.trans_amount.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "asset_record.trans_amount",
            });
        }
        Ok(())
    }
}

/// Stored account state. `mpin` is kept in plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetRecord {
    #[serde(rename = "DEALERID")]
    pub dealer_id: DealerId,
    #[serde(rename = "MSISDN")]
    pub msisdn: String,
    #[serde(rename = "MPIN")]
    pub mpin: String,
    #[serde(rename = "BALANCE")]
    pub balance: f64,
    #[serde(rename = "STATUS")]
    pub status: String,
    #[serde(rename = "TRANSAMOUNT")]
    pub trans_amount: f64,
    #[serde(rename = "TRANSTYPE")]
    pub trans_type: String,
    #[serde(rename = "REMARKS")]
    pub remarks: String,
}

impl AssetRecord {
    pub fn v1(dealer_id: DealerId, fields: AssetFields) -> Result<Self, ContractViolation> {
        fields.validate()?;
        let record = Self {
            dealer_id,
            msisdn: fields.msisdn,
            mpin: fields.mpin,
            balance: fields.balance,
            status: fields.status,
            trans_amount: fields.trans_amount,
            trans_type: fields.trans_type,
            remarks: fields.remarks,
        };
        record.validate()?;
        Ok(record)
    }

    /// Placeholder emitted for deletion versions: only the key is meaningful.
    pub fn tombstone(dealer_id: DealerId) -> Self {
        Self {
            dealer_id,
            msisdn: String::new(),
            mpin: String::new(),
            balance: 0.0,
            status: String::new(),
            trans_amount: 0.0,
            trans_type: String::new(),
            remarks: String::new(),
        }
    }

    pub fn fields(&self) -> AssetFields {
        AssetFields {
            msisdn: self.msisdn.clone(),
            mpin: self.mpin.clone(),
            balance: self.balance,
            status: self.status.clone(),
            trans_amount: self.trans_amount,
            trans_type: self.trans_type.clone(),
            remarks: self.remarks.clone(),
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ContractViolation> {
        self.validate()?;
        serde_json::to_vec(self).map_err(|_| ContractViolation::InvalidValue {
            field: "asset_record",
            reason: "json encoding failed",
        })
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, RecordDecodeError> {
        let record: Self =
            serde_json::from_slice(bytes).map_err(|err| RecordDecodeError::Json(err.to_string()))?;
        record.validate().map_err(RecordDecodeError::Contract)?;
        Ok(record)
    }
}

impl Validate for AssetRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.dealer_id.validate()?;
        if !self.balance.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "asset_record.balance",
            });
        }
        if !self.trans_amount.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "asset_record.trans_amount",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordDecodeError {
    Json(String),
    Contract(ContractViolation),
}

impl fmt::Display for RecordDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordDecodeError::Json(reason) => write!(f, "malformed record json: {reason}"),
            RecordDecodeError::Contract(v) => write!(f, "record violates contract: {v}"),
        }
    }
}

impl std::error::Error for RecordDecodeError {}
