#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(pub u32);

/// Commit time in nanoseconds since the unix epoch, as assigned by the store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MonotonicTimeNs(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum ContractViolation {
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    NotFinite {
        field: &'static str,
    },
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractViolation::InvalidValue { field, reason } => {
                write!(f, "invalid value for {field}: {reason}")
            }
            ContractViolation::NotFinite { field } => write!(f, "{field} must be finite"),
        }
    }
}

impl std::error::Error for ContractViolation {}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

pub(crate) fn validate_id(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    if !value.is_ascii() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be ASCII",
        });
    }
    Ok(())
}
