#![forbid(unsafe_code)]

pub mod asset;
pub mod error;
pub mod history;

pub use asset::{AssetIter, AssetLifecycle, AssetLifecycleManager};
pub use error::AssetError;
pub use history::{AssetHistory, HistoryIter, HistoryReconstructor};
