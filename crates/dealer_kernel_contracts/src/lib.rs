#![forbid(unsafe_code)]

pub mod asset;
pub mod common;
pub mod history;

pub use common::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};
