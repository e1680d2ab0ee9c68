//! Settings Storage Abstraction
//!
//! Key-value persistence for the plugin settings document.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{BridgeError, Result};

/// Key-value settings storage trait
///
/// Abstracts the host's persistent storage for plugin data:
/// - Desktop: SQLite database or config files
/// - Plugin hosts: the host's `loadData`/`saveData` slot
/// - Tests: [`MemorySettingsStore`]
///
/// Values are opaque strings. The credential core stores one JSON document
/// per key and performs its own (de)serialization.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn save_document(store: &dyn SettingsStore, json: &str) -> Result<()> {
///     store.set_string("plugin_settings", json).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }
}

/// In-process settings store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> BridgeError {
    BridgeError::StorageError("settings lock poisoned".to_string())
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySettingsStore::new();
        assert!(!store.has_key("plugin_settings").await.unwrap());

        store.set_string("plugin_settings", "{}").await.unwrap();
        assert_eq!(
            store.get_string("plugin_settings").await.unwrap().as_deref(),
            Some("{}")
        );
        assert!(store.has_key("plugin_settings").await.unwrap());

        store.delete("plugin_settings").await.unwrap();
        assert_eq!(store.get_string("plugin_settings").await.unwrap(), None);
    }
}
