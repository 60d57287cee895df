use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CacheError;
use crate::model::{CacheEntry, ForecastPayload};

pub const PAYLOAD_KEY: &str = "forecast_payload";
pub const FETCHED_AT_KEY: &str = "forecast_fetched_at";

/// A cached forecast is served for one hour after it was fetched.
pub const CACHE_TTL_MS: i64 = 60 * 60 * 1000;

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync + Debug {
    /// Values for `keys`, in order, taken from one snapshot of the store.
    fn get_many(&self, keys: &[&str]) -> Vec<Option<String>>;

    fn get(&self, key: &str) -> Option<String> {
        self.get_many(&[key]).pop().flatten()
    }

    /// Store every pair at once; readers never observe a subset.
    fn set_all(&self, entries: &[(&str, String)]) -> Result<(), CacheError>;
}

/// Key-value map persisted as one JSON object in `<dir>/store.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("store.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> io::Result<BTreeMap<String, String>> {
        let contents = fs::read_to_string(&self.path)?;
        serde_json::from_str(&contents)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }
}

impl KeyValueStore for FileStore {
    fn get_many(&self, keys: &[&str]) -> Vec<Option<String>> {
        let mut map = match self.load() {
            Ok(map) => map,
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), %error, "unreadable cache store");
                }
                BTreeMap::new()
            }
        };
        keys.iter().map(|key| map.remove(*key)).collect()
    }

    fn set_all(&self, entries: &[(&str, String)]) -> Result<(), CacheError> {
        let mut map = self.load().unwrap_or_default();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        let bytes = serde_json::to_vec(&map)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "cache path must have a parent directory",
        )
    })?;
    fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension(format!("{}.tmp", std::process::id()));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get_many(&self, keys: &[&str]) -> Vec<Option<String>> {
        (**self).get_many(keys)
    }

    fn set_all(&self, entries: &[(&str, String)]) -> Result<(), CacheError> {
        (**self).set_all(entries)
    }
}

/// In-process store, mostly for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_many(&self, keys: &[&str]) -> Vec<Option<String>> {
        let map = self.map.lock();
        keys.iter().map(|key| map.get(*key).cloned()).collect()
    }

    fn set_all(&self, entries: &[(&str, String)]) -> Result<(), CacheError> {
        let mut map = self.map.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}

/// Last successful forecast plus the moment it was fetched.
#[derive(Debug)]
pub struct CacheStore {
    store: Box<dyn KeyValueStore>,
}

impl CacheStore {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Missing, corrupt or structurally invalid data all read as a miss.
    pub fn read(&self) -> Option<CacheEntry> {
        let mut values = self
            .store
            .get_many(&[PAYLOAD_KEY, FETCHED_AT_KEY])
            .into_iter();
        let raw_payload = values.next().flatten()?;
        let raw_fetched_at = values.next().flatten()?;

        let fetched_at_ms = match raw_fetched_at.trim().parse::<i64>() {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(%error, "cache timestamp unparsable; treating as miss");
                return None;
            }
        };

        let payload = match serde_json::from_str::<ForecastPayload>(&raw_payload) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::debug!(%error, "cache payload corrupt; treating as miss");
                return None;
            }
        };

        if let Err(error) = payload.hourly.validate() {
            tracing::debug!(%error, "cached series invalid; treating as miss");
            return None;
        }

        Some(CacheEntry {
            payload,
            fetched_at_ms,
        })
    }

    /// Replace any previous entry.
    pub fn write(&self, payload: &ForecastPayload, now_ms: i64) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(payload)?;
        self.store.set_all(&[
            (PAYLOAD_KEY, serialized),
            (FETCHED_AT_KEY, now_ms.to_string()),
        ])
    }

    pub fn is_valid(entry: &CacheEntry, now_ms: i64) -> bool {
        now_ms - entry.fetched_at_ms < CACHE_TTL_MS
    }
}
