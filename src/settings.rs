//! Namespaced persistent key/value settings.
//!
//! The device analog of an NVS partition: small typed values grouped by
//! namespace, persisted as a TOML document. The OTA flow uses this to merge
//! server-pushed broker configuration, rewriting only keys that changed.

use crate::error::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

type Namespace = BTreeMap<String, toml::Value>;

struct Store {
    path: Option<PathBuf>,
    namespaces: BTreeMap<String, Namespace>,
    autosave: bool,
}

/// Cloneable handle to the settings store.
///
/// All clones share one underlying document; access is serialized by an
/// internal mutex held only for map manipulation, never across I/O on the
/// caller side.
#[derive(Clone)]
pub struct Settings {
    inner: Arc<Mutex<Store>>,
}

impl Settings {
    /// In-memory store with no backing file. Used by tests and as the
    /// fallback when no settings path is configured.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Store {
                path: None,
                namespaces: BTreeMap::new(),
                autosave: false,
            })),
        }
    }

    /// Open (or create) a file-backed store.
    ///
    /// With `autosave` every mutation rewrites the file; otherwise callers
    /// persist explicitly via [`Settings::save`].
    pub fn open(path: PathBuf, autosave: bool) -> Result<Self> {
        let namespaces = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(Store {
                path: Some(path),
                namespaces,
                autosave,
            })),
        })
    }

    pub fn get_str(&self, namespace: &str, key: &str) -> Option<String> {
        let store = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        store
            .namespaces
            .get(namespace)?
            .get(key)?
            .as_str()
            .map(str::to_string)
    }

    pub fn get_int(&self, namespace: &str, key: &str) -> Option<i64> {
        let store = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        store.namespaces.get(namespace)?.get(key)?.as_integer()
    }

    pub fn set_str(&self, namespace: &str, key: &str, value: &str) {
        self.set_value(namespace, key, toml::Value::String(value.to_string()));
    }

    pub fn set_int(&self, namespace: &str, key: &str, value: i64) {
        self.set_value(namespace, key, toml::Value::Integer(value));
    }

    fn set_value(&self, namespace: &str, key: &str, value: toml::Value) {
        let mut store = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        store
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        if store.autosave {
            if let Err(e) = persist(&store) {
                warn!(namespace, key, error = %e, "failed to persist settings");
            }
        }
    }

    /// Write the store to its backing file. No-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let store = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        persist(&store)
    }
}

fn persist(store: &Store) -> Result<()> {
    let Some(path) = &store.path else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string(&store.namespaces)
        .map_err(|e| crate::error::VoicelinkError::Other(format!("settings encode: {e}")))?;
    fs::write(path, content)?;
    Ok(())
}
