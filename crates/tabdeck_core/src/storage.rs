//! Persistent Key-Value Storage
//!
//! The browser's storage area is modelled as a small key-value capability
//! with change notifications. Two implementations are provided: an
//! in-memory store and a JSON file under the platform config directory.
//!
//! # Storage Locations
//! - Linux: `~/.config/tabdeck/storage.json`
//! - Windows: `%APPDATA%\tabdeck\storage.json`
//! - macOS: `~/Library/Application Support/com.tabdeck.tabdeck/storage.json`
//!
//! # Layout
//! | Key                      | Value                          |
//! |--------------------------|--------------------------------|
//! | `eqMem:<origin><path>`   | `{ gains: [..], timestamp }`   |
//! | `eqCustomPresets`        | `[{ name, gains: [..], q? }]`  |
//! | `eqGlobalQ`              | number                         |
//! | `seekStep` / `speedStep` / `volumeStep` | number or numeric string |

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabdeck_dsp::{clamp_q, PresetRef};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{EqSettings, StepSettings};
use crate::error::StorageError;

pub const EQ_MEMORY_PREFIX: &str = "eqMem:";
pub const CUSTOM_PRESETS_KEY: &str = "eqCustomPresets";
pub const GLOBAL_Q_KEY: &str = "eqGlobalQ";
pub const SEEK_STEP_KEY: &str = "seekStep";
pub const SPEED_STEP_KEY: &str = "speedStep";
pub const VOLUME_STEP_KEY: &str = "volumeStep";

/// Gains below this magnitude count as flat
const FLAT_EPSILON: f32 = 1e-4;

/// Capacity of the change-notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// One key changed (or was removed when `value` is `None`)
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub value: Option<Value>,
}

/// Get/set/observe by key
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Vec<String>;
    /// Receive every subsequent change
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Volatile store, used by tests and as a fallback
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    fn notify(&self, key: &str, value: Option<Value>) {
        // No receivers is fine
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            value,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), value.clone());
        self.notify(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.entries.write().remove(key).is_some() {
            self.notify(key, None);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Store persisted as one JSON document, rewritten on every change
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if missing or corrupt
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let inner = MemoryStore::new();

        if path.exists() {
            match fs::File::open(&path) {
                Ok(file) => match serde_json::from_reader::<_, BTreeMap<String, Value>>(file) {
                    Ok(entries) => {
                        info!("Storage loaded from {:?} ({} keys)", path, entries.len());
                        *inner.entries.write() = entries;
                    }
                    Err(e) => {
                        error!("Failed to parse storage file: {}", e);
                    }
                },
                Err(e) => {
                    error!("Failed to open storage file: {}", e);
                }
            }
        } else {
            info!("No storage file at {:?}, starting empty", path);
        }

        Self { path, inner }
    }

    /// Open the store in the platform-specific config directory
    pub fn open_default() -> Result<Self, StorageError> {
        let path = Self::default_path().ok_or(StorageError::NoConfigDir)?;
        Ok(Self::open(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "tabdeck", "tabdeck")
            .map(|proj| proj.config_dir().join("storage.json"))
    }

    fn flush(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(&self.path)?;
        let entries = self.inner.entries.read();
        serde_json::to_writer_pretty(file, &*entries)?;
        debug!("Storage saved to {:?}", self.path);
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.inner.entries.write().insert(key.to_string(), value.clone());
        self.flush()?;
        self.inner.notify(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = self.inner.entries.write().remove(key).is_some();
        if removed {
            self.flush()?;
            self.inner.notify(key, None);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.subscribe()
    }
}

/// Per-page EQ memory key: `eqMem:` + origin + path (query and fragment ignored)
pub fn page_key(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(format!(
        "{}{}{}",
        EQ_MEMORY_PREFIX,
        origin.ascii_serialization(),
        parsed.path()
    ))
}

/// Saved gains for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEqMemory {
    pub gains: Vec<f32>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl PageEqMemory {
    pub fn new(gains: Vec<f32>) -> Self {
        Self {
            gains,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Any band away from flat
    pub fn is_modified(&self) -> bool {
        self.gains.iter().any(|g| g.abs() > FLAT_EPSILON)
    }
}

/// A named gain vector with optional Q, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPreset {
    pub name: String,
    pub gains: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<f32>,
}

impl StoredPreset {
    pub fn as_preset_ref(&self) -> PresetRef<'_> {
        PresetRef {
            name: &self.name,
            gains: &self.gains,
            q: self.q,
        }
    }
}

impl From<&tabdeck_dsp::Preset> for StoredPreset {
    fn from(p: &tabdeck_dsp::Preset) -> Self {
        Self {
            name: p.name.to_string(),
            gains: p.gains.to_vec(),
            q: p.q,
        }
    }
}

pub fn load_page_memory(store: &dyn KeyValueStore, url: &str) -> Option<PageEqMemory> {
    let key = page_key(url)?;
    let value = store.get(&key)?;
    match serde_json::from_value(value) {
        Ok(memory) => Some(memory),
        Err(e) => {
            warn!("Ignoring corrupt EQ memory under {}: {}", key, e);
            None
        }
    }
}

pub fn save_page_memory(
    store: &dyn KeyValueStore,
    url: &str,
    gains: &[f32],
) -> Result<(), StorageError> {
    let Some(key) = page_key(url) else {
        debug!("No EQ memory key for {}", url);
        return Ok(());
    };
    let value = serde_json::to_value(PageEqMemory::new(gains.to_vec()))?;
    store.set(&key, value)
}

/// Whether the page has a saved non-flat gain vector (Q is not considered)
pub fn page_eq_modified(store: &dyn KeyValueStore, url: &str) -> bool {
    load_page_memory(store, url).is_some_and(|m| m.is_modified())
}

pub fn load_custom_presets(store: &dyn KeyValueStore) -> Vec<StoredPreset> {
    let Some(value) = store.get(CUSTOM_PRESETS_KEY) else {
        return Vec::new();
    };
    match serde_json::from_value(value) {
        Ok(presets) => presets,
        Err(e) => {
            warn!("Ignoring corrupt custom preset list: {}", e);
            Vec::new()
        }
    }
}

pub fn save_custom_presets(
    store: &dyn KeyValueStore,
    presets: &[StoredPreset],
) -> Result<(), StorageError> {
    store.set(CUSTOM_PRESETS_KEY, serde_json::to_value(presets)?)
}

/// Global Q, clamped to the configured range
pub fn load_global_q(store: &dyn KeyValueStore, settings: &EqSettings) -> f32 {
    store
        .get(GLOBAL_Q_KEY)
        .and_then(|v| value_as_f64(&v))
        .map(|q| clamp_q(q as f32, &settings.q_range()))
        .unwrap_or(settings.default_q)
}

pub fn save_global_q(store: &dyn KeyValueStore, q: f32) -> Result<(), StorageError> {
    store.set(GLOBAL_Q_KEY, Value::from(q as f64))
}

/// Step sizes with stored overrides applied where valid
pub fn load_step_settings(store: &dyn KeyValueStore) -> StepSettings {
    let mut steps = StepSettings::default();
    apply_step_value(&mut steps, SEEK_STEP_KEY, store.get(SEEK_STEP_KEY).as_ref());
    apply_step_value(&mut steps, SPEED_STEP_KEY, store.get(SPEED_STEP_KEY).as_ref());
    apply_step_value(&mut steps, VOLUME_STEP_KEY, store.get(VOLUME_STEP_KEY).as_ref());
    steps
}

/// Apply one stored step value; returns false for unrelated keys or rejected values
pub fn apply_step_value(steps: &mut StepSettings, key: &str, value: Option<&Value>) -> bool {
    let Some(v) = value.and_then(value_as_f64) else {
        return false;
    };
    match key {
        SEEK_STEP_KEY => steps.accept_seek_step(v),
        SPEED_STEP_KEY => steps.accept_speed_step(v),
        VOLUME_STEP_KEY => steps.accept_volume_step(v),
        _ => false,
    }
}

/// Numbers may arrive as JSON numbers or numeric strings from form fields
fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
