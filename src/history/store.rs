//! Durable key-value storage for the tab history.
//!
//! The tracker persists two values under fixed keys after every mutation.
//! Backends implement [`KeyValueStore`]; two are provided:
//!
//! - [`MemoryStore`] keeps values in process memory. Clones share the same
//!   map, so a store can outlive a tracker to simulate a restart.
//! - [`JsonFileStore`] keeps one JSON object in a file, by default
//!   `~/.config/tab-recall/history.json`.

use super::state::HistoryState;
use super::{TabId, WindowId};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Storage key for the per-window activation order
pub const TAB_LIST_OF_WINDOW_KEY: &str = "tabListOfWindow";
/// Storage key for the tab → window index
pub const WINDOW_ID_OF_TAB_KEY: &str = "windowIdOfTab";

/// A batch of storage entries keyed by name
pub type StorageMap = Map<String, Value>;

/// Durable key-value store used to persist history between runs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the requested keys.
    ///
    /// `defaults` names the keys to read; a key with no stored value is
    /// returned with its default.
    async fn get(&self, defaults: StorageMap) -> Result<StorageMap, StoreError>;

    /// Write every entry in `items`, leaving other keys untouched.
    async fn set(&self, items: StorageMap) -> Result<(), StoreError>;
}

/// Encode history into the two persisted entries
pub fn encode_state(state: &HistoryState) -> Result<StorageMap, StoreError> {
    let mut items = StorageMap::new();
    items.insert(
        TAB_LIST_OF_WINDOW_KEY.to_string(),
        serde_json::to_value(&state.tab_list_of_window)?,
    );
    items.insert(
        WINDOW_ID_OF_TAB_KEY.to_string(),
        serde_json::to_value(&state.window_id_of_tab)?,
    );
    Ok(items)
}

/// The `defaults` argument for reading history: both keys, empty objects
pub fn state_defaults() -> StorageMap {
    let mut defaults = StorageMap::new();
    defaults.insert(
        TAB_LIST_OF_WINDOW_KEY.to_string(),
        Value::Object(Map::new()),
    );
    defaults.insert(WINDOW_ID_OF_TAB_KEY.to_string(), Value::Object(Map::new()));
    defaults
}

/// Decode the persisted entries into raw maps, without repairing them
pub fn decode_parts(
    mut items: StorageMap,
) -> Result<(BTreeMap<WindowId, Vec<TabId>>, BTreeMap<TabId, WindowId>), StoreError> {
    let lists = decode_entry(&mut items, TAB_LIST_OF_WINDOW_KEY)?;
    let index = decode_entry(&mut items, WINDOW_ID_OF_TAB_KEY)?;
    Ok((lists, index))
}

fn decode_entry<T>(items: &mut StorageMap, key: &str) -> Result<T, StoreError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match items.remove(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(|e| StoreError::Malformed {
            key: key.to_string(),
            details: e.to_string(),
        }),
    }
}

fn read_with_defaults(stored: &StorageMap, defaults: StorageMap) -> StorageMap {
    defaults
        .into_iter()
        .map(|(key, default)| {
            let value = stored.get(&key).cloned().unwrap_or(default);
            (key, value)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<StorageMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything currently stored
    pub fn entries(&self) -> StorageMap {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, defaults: StorageMap) -> Result<StorageMap, StoreError> {
        let stored = self.entries.lock();
        Ok(read_with_defaults(&stored, defaults))
    }

    async fn set(&self, items: StorageMap) -> Result<(), StoreError> {
        self.entries.lock().extend(items);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Store backed by a single JSON object on disk.
///
/// A missing or empty file reads as an empty store. Writes merge into the
/// existing object and replace the file atomically.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles from concurrent `set` calls
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    async fn read_all(&self) -> Result<StorageMap, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                crate::debug_log!("STORE", "No history file at {:?}", self.path);
                return Ok(StorageMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        if contents.trim().is_empty() {
            return Ok(StorageMap::new());
        }

        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Malformed {
                key: "<root>".to_string(),
                details: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, defaults: StorageMap) -> Result<StorageMap, StoreError> {
        let stored = self.read_all().await?;
        Ok(read_with_defaults(&stored, defaults))
    }

    async fn set(&self, items: StorageMap) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut stored = self.read_all().await?;
        stored.extend(items);

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let contents = serde_json::to_string_pretty(&Value::Object(stored))?;

        // Atomic save: write to temp file then rename to prevent corruption on crash
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, contents)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        crate::debug_trace!("STORE", "Wrote history to {:?}", self.path);
        Ok(())
    }
}
