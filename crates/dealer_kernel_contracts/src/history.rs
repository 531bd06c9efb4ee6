#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::asset::AssetRecord;
use crate::common::validate_id;
use crate::{ContractViolation, MonotonicTimeNs, Validate};

/// Opaque identifier of the write that produced a version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for TxId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("tx_id", &self.0, 128)
    }
}

impl TryFrom<String> for TxId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TxId> for String {
    fn from(value: TxId) -> Self {
        value.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One point-in-time snapshot of a dealer account, or its deletion marker.
/// On the wire `timestamp` is an RFC 3339 UTC time with nanosecond precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "txId")]
    pub tx_id: TxId,
    #[serde(with = "rfc3339_ns")]
    pub timestamp: MonotonicTimeNs,
    pub record: AssetRecord,
    #[serde(rename = "isDelete")]
    pub is_delete: bool,
}

impl HistoryEntry {
    pub fn snapshot(tx_id: TxId, timestamp: MonotonicTimeNs, record: AssetRecord) -> Self {
        Self {
            tx_id,
            timestamp,
            record,
            is_delete: false,
        }
    }

    pub fn tombstone(tx_id: TxId, timestamp: MonotonicTimeNs, record: AssetRecord) -> Self {
        Self {
            tx_id,
            timestamp,
            record,
            is_delete: true,
        }
    }
}

mod rfc3339_ns {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::MonotonicTimeNs;

    const NANOS_PER_SEC: u64 = 1_000_000_000;

    pub fn serialize<S: Serializer>(
        ts: &MonotonicTimeNs,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let secs = i64::try_from(ts.0 / NANOS_PER_SEC).map_err(S::Error::custom)?;
        let nanos = u32::try_from(ts.0 % NANOS_PER_SEC).map_err(S::Error::custom)?;
        let at = DateTime::<Utc>::from_timestamp(secs, nanos)
            .ok_or_else(|| S::Error::custom("timestamp out of range"))?;
        serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<MonotonicTimeNs, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let at = DateTime::parse_from_rfc3339(&raw).map_err(D::Error::custom)?;
        at.timestamp_nanos_opt()
            .and_then(|ns| u64::try_from(ns).ok())
            .map(MonotonicTimeNs)
            .ok_or_else(|| D::Error::custom("timestamp before the unix epoch or out of range"))
    }
}
