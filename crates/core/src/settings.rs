//! Key-value settings: the API credential and a stable installation id.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SettingsError;

pub const API_KEY: &str = "apiKey";
pub const INSTALLATION_ID: &str = "installationId";

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;

    /// Values for several keys from one read of the store.
    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>, SettingsError> {
        keys.iter().map(|key| self.get(key)).collect()
    }
}

impl<T: SettingsStore + ?Sized> SettingsStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        (**self).get(key)
    }

    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>, SettingsError> {
        (**self).get_all(keys)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        (**self).set(key, value)
    }
}

/// What a summary request needs from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub installation_id: String,
}

fn clean_credential(value: Option<String>) -> Option<String> {
    value.map(|key| key.trim().to_string()).filter(|key| !key.is_empty())
}

fn new_installation_id<S: SettingsStore + ?Sized>(store: &S) -> Result<String, SettingsError> {
    let id = Uuid::new_v4().to_string();
    info!(installation_id = %id, "generated installation id");
    store.set(INSTALLATION_ID, &id)?;
    Ok(id)
}

/// The stored credential. Blank values count as unset.
pub fn credential<S: SettingsStore + ?Sized>(store: &S) -> Result<Option<String>, SettingsError> {
    Ok(clean_credential(store.get(API_KEY)?))
}

/// The per-installation id, generated and persisted on first use.
pub fn installation_id<S: SettingsStore + ?Sized>(store: &S) -> Result<String, SettingsError> {
    match store.get(INSTALLATION_ID)?.filter(|id| !id.is_empty()) {
        Some(id) => Ok(id),
        None => new_installation_id(store),
    }
}

/// Credential and installation id from a single read of the store, or
/// `None` when no credential is set. A missing id is generated only once a
/// credential is present.
pub fn credentials<S: SettingsStore + ?Sized>(store: &S) -> Result<Option<Credentials>, SettingsError> {
    let mut values = store.get_all(&[API_KEY, INSTALLATION_ID])?.into_iter();
    let Some(api_key) = clean_credential(values.next().flatten()) else {
        return Ok(None);
    };
    let installation_id = match values.next().flatten().filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => new_installation_id(store)?,
    };
    Ok(Some(Credentials {
        api_key,
        installation_id,
    }))
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(key: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert(API_KEY.to_string(), key.to_string());
        Self {
            values: Mutex::new(values),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let values = self.values.lock().map_err(|_| SettingsError::LockPoisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().map_err(|_| SettingsError::LockPoisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>, SettingsError> {
        let values = self.values.lock().map_err(|_| SettingsError::LockPoisoned)?;
        Ok(keys.iter().map(|key| values.get(*key).cloned()).collect())
    }
}

/// Settings kept in a flat JSON object on disk. A missing file reads as
/// empty; the file and its parent directory are created on first write.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file yet");
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, values: &BTreeMap<String, String>) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(values).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(write_err)
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let _guard = self.lock.lock().map_err(|_| SettingsError::LockPoisoned)?;
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let _guard = self.lock.lock().map_err(|_| SettingsError::LockPoisoned)?;
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.store(&values)
    }

    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>, SettingsError> {
        let _guard = self.lock.lock().map_err(|_| SettingsError::LockPoisoned)?;
        let mut values = self.load()?;
        Ok(keys.iter().map(|key| values.remove(*key)).collect())
    }
}
