#![forbid(unsafe_code)]

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dealer_kernel_contracts::asset::{
    AssetFields, AssetRecord, DealerId, ASSET_CONTRACT_VERSION,
};
use dealer_kernel_contracts::history::{HistoryEntry, TxId};
use dealer_kernel_contracts::{MonotonicTimeNs, SchemaVersion};
use dealer_os::{
    AssetError, AssetHistory, AssetLifecycle, AssetLifecycleManager, HistoryReconstructor,
};
use dealer_storage::{
    HistoryCursor, KeyModification, StateCursor, StorageError, VersionedKvStore, VersionedStore,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: String,
    pub persistence_enabled: bool,
    pub journal_path: PathBuf,
}

impl AdapterConfig {
    pub fn from_env() -> Self {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map<F>(mut env_getter: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let bind = env_getter("DEALER_HTTP_BIND")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let persistence_enabled = match env_getter("DEALER_ADAPTER_PERSISTENCE_ENABLED") {
            Some(v) => !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            ),
            None => true,
        };
        let journal_path = env_getter("DEALER_ADAPTER_STORE_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_adapter_store_path);
        Self {
            bind,
            persistence_enabled,
            journal_path,
        }
    }
}

fn default_adapter_store_path() -> PathBuf {
    PathBuf::from(".dealer").join("adapter_store_journal.jsonl")
}

/// Numbers may arrive as JSON numbers or as numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericField {
    Number(f64),
    Text(String),
}

impl NumericField {
    fn parse(&self, field: &'static str) -> Result<f64, AdapterError> {
        match self {
            NumericField::Number(v) => Ok(*v),
            NumericField::Text(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| AdapterError::BadRequest(format!("{field} must be a number"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetWriteRequest {
    #[serde(rename = "DEALERID", default, skip_serializing_if = "Option::is_none")]
    pub dealer_id: Option<String>,
    #[serde(rename = "MSISDN", default)]
    pub msisdn: String,
    #[serde(rename = "MPIN", default)]
    pub mpin: String,
    #[serde(rename = "BALANCE")]
    pub balance: NumericField,
    #[serde(rename = "STATUS", default)]
    pub status: String,
    #[serde(rename = "TRANSAMOUNT")]
    pub trans_amount: NumericField,
    #[serde(rename = "TRANSTYPE", default)]
    pub trans_type: String,
    #[serde(rename = "REMARKS", default)]
    pub remarks: String,
}

impl AssetWriteRequest {
    fn asset_fields(&self) -> Result<AssetFields, AdapterError> {
        Ok(AssetFields {
            msisdn: self.msisdn.clone(),
            mpin: self.mpin.clone(),
            balance: self.balance.parse("BALANCE")?,
            status: self.status.clone(),
            trans_amount: self.trans_amount.parse("TRANSAMOUNT")?,
            trans_type: self.trans_type.clone(),
            remarks: self.remarks.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMessageResponse {
    pub message: String,
}

impl AssetMessageResponse {
    fn v1(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterErrorResponse {
    pub status: String,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub live_assets: usize,
    pub persistence_enabled: bool,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("adapter store lock poisoned")]
    LockPoisoned,
    #[error("adapter store journal: {0}")]
    Journal(String),
}

impl AdapterError {
    pub fn http_status(&self) -> u16 {
        match self {
            AdapterError::BadRequest(_) => 400,
            AdapterError::Asset(AssetError::NotFound { .. }) => 404,
            AdapterError::Asset(AssetError::AlreadyExists { .. }) => 409,
            AdapterError::Asset(AssetError::InvalidRecord(_)) => 400,
            AdapterError::Asset(AssetError::DecodeError { .. })
            | AdapterError::Asset(AssetError::StoreUnavailable(_))
            | AdapterError::LockPoisoned
            | AdapterError::Journal(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::BadRequest(_) => "BAD_REQUEST",
            AdapterError::Asset(err) => err.kind(),
            AdapterError::LockPoisoned => "LOCK_POISONED",
            AdapterError::Journal(_) => "JOURNAL_FAILURE",
        }
    }

    pub fn to_response(&self) -> AdapterErrorResponse {
        AdapterErrorResponse {
            status: "error".to_string(),
            kind: self.kind().to_string(),
            reason: self.to_string(),
        }
    }
}

fn parse_dealer_id(raw: &str) -> Result<DealerId, AdapterError> {
    DealerId::new(raw).map_err(|v| AdapterError::BadRequest(v.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdapterJournalEntry {
    schema_version: SchemaVersion,
    key: String,
    tx_id: TxId,
    timestamp: MonotonicTimeNs,
    is_delete: bool,
    value_b64: String,
}

impl AdapterJournalEntry {
    fn v1(key: &str, modification: &KeyModification) -> Self {
        Self {
            schema_version: ASSET_CONTRACT_VERSION,
            key: key.to_string(),
            tx_id: modification.tx_id.clone(),
            timestamp: modification.timestamp,
            is_delete: modification.is_delete,
            value_b64: BASE64.encode(&modification.value),
        }
    }

    fn into_modification(self) -> Result<(String, KeyModification), String> {
        let value = BASE64
            .decode(self.value_b64.as_bytes())
            .map_err(|err| format!("value_b64 is not base64: {err}"))?;
        Ok((
            self.key,
            KeyModification {
                tx_id: self.tx_id,
                timestamp: self.timestamp,
                value,
                is_delete: self.is_delete,
            },
        ))
    }
}

#[derive(Debug, Clone)]
struct AdapterPersistence {
    journal_path: PathBuf,
}

fn journal_unavailable(reason: String) -> StorageError {
    StorageError::Unavailable {
        op: "journal_append",
        reason,
    }
}

fn append_journal_entry(
    path: &Path,
    key: &str,
    modification: &KeyModification,
) -> Result<(), StorageError> {
    let entry = AdapterJournalEntry::v1(key, modification);
    let json = serde_json::to_string(&entry)
        .map_err(|err| journal_unavailable(format!("failed to encode entry: {err}")))?;
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|err| {
            journal_unavailable(format!(
                "failed opening '{}' for append: {}",
                path.display(),
                err
            ))
        })?;
    file.write_all(json.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .and_then(|_| file.sync_data())
        .map_err(|err| {
            warn!(journal = %path.display(), error = %err, "journal append failed");
            journal_unavailable(format!("failed writing '{}': {}", path.display(), err))
        })
}

/// Store view for one request: every write is staged, appended to the
/// journal, and only then committed to the in-memory store.
struct JournaledStore<'s> {
    store: &'s mut VersionedKvStore,
    journal_path: &'s Path,
}

impl JournaledStore<'_> {
    fn commit_journaled(
        &mut self,
        key: &str,
        modification: KeyModification,
    ) -> Result<(), StorageError> {
        append_journal_entry(self.journal_path, key, &modification)?;
        self.store.apply_modification(key, modification)
    }
}

impl VersionedStore for JournaledStore<'_> {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.store.get_state(key)
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let modification = self.store.stage_put(key, value)?;
        self.commit_journaled(key, modification)
    }

    fn del_state(&mut self, key: &str) -> Result<(), StorageError> {
        let modification = self.store.stage_delete(key)?;
        self.commit_journaled(key, modification)
    }

    fn state_by_range<'a>(
        &'a self,
        start: &str,
        end: &str,
    ) -> Result<StateCursor<'a>, StorageError> {
        self.store.state_by_range(start, end)
    }

    fn history_for_key<'a>(&'a self, key: &str) -> Result<HistoryCursor<'a>, StorageError> {
        self.store.history_for_key(key)
    }
}

/// Maps inbound asset requests onto the lifecycle manager and history
/// reconstructor over a shared reference store.
#[derive(Debug, Clone)]
pub struct AdapterRuntime {
    store: Arc<Mutex<VersionedKvStore>>,
    lifecycle: AssetLifecycleManager,
    history: HistoryReconstructor,
    persistence: Option<AdapterPersistence>,
}

impl Default for AdapterRuntime {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl AdapterRuntime {
    pub fn new_in_memory() -> Self {
        Self {
            store: Arc::new(Mutex::new(VersionedKvStore::new_in_memory())),
            lifecycle: AssetLifecycleManager::new(),
            history: HistoryReconstructor::new(),
            persistence: None,
        }
    }

    pub fn new_with_persistence(
        store: Arc<Mutex<VersionedKvStore>>,
        journal_path: PathBuf,
    ) -> Result<Self, AdapterError> {
        let runtime = Self {
            store,
            lifecycle: AssetLifecycleManager::new(),
            history: HistoryReconstructor::new(),
            persistence: Some(AdapterPersistence { journal_path }),
        };
        runtime.ensure_persistence_ready()?;
        runtime.replay_journal_into_store()?;
        Ok(runtime)
    }

    pub fn from_config(config: &AdapterConfig) -> Result<Self, AdapterError> {
        if !config.persistence_enabled {
            return Ok(Self::new_in_memory());
        }
        Self::new_with_persistence(
            Arc::new(Mutex::new(VersionedKvStore::new_in_memory())),
            config.journal_path.clone(),
        )
    }

    pub fn create_asset(
        &self,
        request: AssetWriteRequest,
    ) -> Result<AssetMessageResponse, AdapterError> {
        let raw_id = request
            .dealer_id
            .as_deref()
            .ok_or_else(|| AdapterError::BadRequest("DEALERID is required".to_string()))?;
        let dealer_id = parse_dealer_id(raw_id)?;
        let fields = request.asset_fields()?;

        info!(dealer_id = %dealer_id, "submitting create");
        self.write_through(|store| self.lifecycle.create(store, &dealer_id, fields))?;
        info!(dealer_id = %dealer_id, "create committed");
        Ok(AssetMessageResponse::v1("Asset created successfully"))
    }

    pub fn read_asset(&self, raw_id: &str) -> Result<Vec<u8>, AdapterError> {
        let dealer_id = parse_dealer_id(raw_id)?;
        debug!(dealer_id = %dealer_id, "evaluating read");
        let store = self.lock_store()?;
        Ok(self.lifecycle.read_raw(&*store, &dealer_id)?)
    }

    pub fn update_asset(
        &self,
        raw_id: &str,
        request: AssetWriteRequest,
    ) -> Result<AssetMessageResponse, AdapterError> {
        let dealer_id = parse_dealer_id(raw_id)?;
        if let Some(body_id) = request.dealer_id.as_deref() {
            if body_id != dealer_id.as_str() {
                return Err(AdapterError::BadRequest(
                    "DEALERID in body does not match the path".to_string(),
                ));
            }
        }
        let fields = request.asset_fields()?;

        info!(dealer_id = %dealer_id, "submitting update");
        self.write_through(|store| self.lifecycle.update(store, &dealer_id, fields))?;
        Ok(AssetMessageResponse::v1("Asset updated successfully"))
    }

    pub fn delete_asset(&self, raw_id: &str) -> Result<AssetMessageResponse, AdapterError> {
        let dealer_id = parse_dealer_id(raw_id)?;

        info!(dealer_id = %dealer_id, "submitting delete");
        self.write_through(|store| self.lifecycle.delete(store, &dealer_id))?;
        Ok(AssetMessageResponse::v1("Asset deleted successfully"))
    }

    pub fn list_assets(&self) -> Result<Vec<AssetRecord>, AdapterError> {
        let store = self.lock_store()?;
        Ok(self.lifecycle.list_all_records(&*store)?)
    }

    pub fn asset_history(&self, raw_id: &str) -> Result<Vec<HistoryEntry>, AdapterError> {
        let dealer_id = parse_dealer_id(raw_id)?;
        debug!(dealer_id = %dealer_id, "evaluating history");
        let store = self.lock_store()?;
        Ok(self.history.history_entries(&*store, &dealer_id)?)
    }

    pub fn health(&self) -> Result<AdapterHealthResponse, AdapterError> {
        let store = self.lock_store()?;
        Ok(AdapterHealthResponse {
            status: "ok".to_string(),
            live_assets: store.live_key_count(),
            persistence_enabled: self.persistence.is_some(),
        })
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, VersionedKvStore>, AdapterError> {
        self.store.lock().map_err(|_| AdapterError::LockPoisoned)
    }

    /// Runs one lifecycle write under the store lock. With persistence on, a
    /// version reaches the in-memory store only after its journal line is
    /// durable.
    fn write_through<T>(
        &self,
        op: impl FnOnce(&mut dyn VersionedStore) -> Result<T, AssetError>,
    ) -> Result<T, AdapterError> {
        let mut store = self.lock_store()?;
        let out = match self.persistence.as_ref() {
            Some(persistence) => {
                let mut journaled = JournaledStore {
                    store: &mut *store,
                    journal_path: &persistence.journal_path,
                };
                op(&mut journaled)?
            }
            None => op(&mut *store)?,
        };
        Ok(out)
    }

    fn ensure_persistence_ready(&self) -> Result<(), AdapterError> {
        let Some(persistence) = self.persistence.as_ref() else {
            return Ok(());
        };
        let path = &persistence.journal_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                AdapterError::Journal(format!(
                    "failed to create directory '{}': {}",
                    parent.display(),
                    err
                ))
            })?;
        }
        if !path.exists() {
            File::create(path).map_err(|err| {
                AdapterError::Journal(format!("failed to create '{}': {}", path.display(), err))
            })?;
        }
        Ok(())
    }

    fn replay_journal_into_store(&self) -> Result<(), AdapterError> {
        let Some(persistence) = self.persistence.as_ref() else {
            return Ok(());
        };
        let path = &persistence.journal_path;
        let file = File::open(path).map_err(|err| {
            AdapterError::Journal(format!("failed to open '{}': {}", path.display(), err))
        })?;
        let mut store = self.lock_store()?;
        let mut replayed = 0usize;
        for (line_no, line_result) in BufReader::new(file).lines().enumerate() {
            let line = line_result.map_err(|err| {
                AdapterError::Journal(format!(
                    "failed reading '{}' at line {}: {}",
                    path.display(),
                    line_no + 1,
                    err
                ))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AdapterJournalEntry = serde_json::from_str(&line).map_err(|err| {
                AdapterError::Journal(format!(
                    "failed parsing '{}' at line {}: {}",
                    path.display(),
                    line_no + 1,
                    err
                ))
            })?;
            if entry.schema_version != ASSET_CONTRACT_VERSION {
                return Err(AdapterError::Journal(format!(
                    "unsupported schema_version={} at line {}",
                    entry.schema_version.0,
                    line_no + 1
                )));
            }
            let (key, modification) = entry.into_modification().map_err(|reason| {
                AdapterError::Journal(format!("line {}: {}", line_no + 1, reason))
            })?;
            store
                .apply_modification(&key, modification)
                .map_err(|err| {
                    AdapterError::Journal(format!("replay failed at line {}: {}", line_no + 1, err))
                })?;
            replayed += 1;
        }
        info!(
            journal = %path.display(),
            versions = replayed,
            "replayed adapter store journal"
        );
        Ok(())
    }
}
