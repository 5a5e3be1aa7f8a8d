//! Small persistent key-value store for the credential and last-used settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{GenError, Result};

pub const API_KEY_KEY: &str = "gemini-api-key";
pub const LAST_PROMPT_KEY: &str = "gemini-last-prompt";
pub const LAST_MODEL_KEY: &str = "gemini-last-model";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| GenError::StoreError("Memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// A flat JSON object on disk. A missing file reads as empty.
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            GenError::StoreError(format!(
                "Unable to read store '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| {
            GenError::StoreError(format!(
                "Unable to parse store '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(entries)
            .map_err(|e| GenError::SerializationError(e.to_string()))?;
        std::fs::write(&self.path, payload).map_err(|e| {
            GenError::StoreError(format!(
                "Unable to write store '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| GenError::StoreError("File store lock poisoned".into()))?;
        let mut entries = self.read_entries()?;
        apply(&mut entries);
        self.write_entries(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

pub struct CredentialStore<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> CredentialStore<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    pub fn api_key(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(API_KEY_KEY)?
            .filter(|key| !key.trim().is_empty()))
    }

    /// An empty key clears the stored one.
    pub fn set_api_key(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            self.store.remove(API_KEY_KEY)
        } else {
            self.store.set(API_KEY_KEY, key)
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(API_KEY_KEY)
    }
}

pub struct PreferenceStore<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> PreferenceStore<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    pub fn last_prompt(&self) -> Result<Option<String>> {
        self.store.get(LAST_PROMPT_KEY)
    }

    pub fn set_last_prompt(&self, prompt: &str) -> Result<()> {
        self.store.set(LAST_PROMPT_KEY, prompt)
    }

    pub fn last_model(&self) -> Result<Option<String>> {
        self.store.get(LAST_MODEL_KEY)
    }

    pub fn set_last_model(&self, model: &str) -> Result<()> {
        self.store.set(LAST_MODEL_KEY, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let store = FileStore::new(&path);
        assert_eq!(store.get("missing").unwrap(), None);
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.remove("a").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("a").unwrap(), None);
        assert_eq!(reopened.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileStore::new(&path).get("x").unwrap_err();
        assert!(matches!(err, GenError::StoreError(_)));
    }

    #[test]
    fn test_empty_api_key_removes_entry() {
        let store = MemoryStore::new();
        let credentials = CredentialStore::new(&store);

        credentials.set_api_key(" secret ").unwrap();
        assert_eq!(credentials.api_key().unwrap().as_deref(), Some("secret"));

        credentials.set_api_key("").unwrap();
        assert_eq!(credentials.api_key().unwrap(), None);
        assert_eq!(store.get(API_KEY_KEY).unwrap(), None);
    }

    #[test]
    fn test_preferences() {
        let store = MemoryStore::new();
        let prefs = PreferenceStore::new(&store);
        assert_eq!(prefs.last_prompt().unwrap(), None);

        prefs.set_last_prompt("a cat").unwrap();
        prefs.set_last_model("gemini-2.5-flash-image").unwrap();
        assert_eq!(prefs.last_prompt().unwrap().as_deref(), Some("a cat"));
        assert_eq!(
            store.get(LAST_MODEL_KEY).unwrap().as_deref(),
            Some("gemini-2.5-flash-image")
        );
    }
}
