//! Durable key-value persistence
//!
//! Every store receives a `KeyValueStorage` at construction and owns exactly
//! one key. Reads fail open, writes are best-effort.

pub mod file;

pub use file::FileStorage;

use crate::error::TrackerError;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Storage key for the goal collection
pub const GOALS_KEY: &str = "goal-tracker-goals";
/// Storage key for the active savings trail
pub const SAVINGS_TRAIL_KEY: &str = "savings-trail-data";
/// Storage key for the finance chat history
pub const CHAT_HISTORY_KEY: &str = "finbot-chat-history";

/// Trait for string-valued durable storage
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage for tests and ephemeral sessions
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Read and decode `key`. Missing, unreadable or malformed values yield `None`.
pub fn load_json<T: DeserializeOwned>(storage: &dyn KeyValueStorage, key: &str) -> Option<T> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(key, error = %e, "Failed to read stored value, starting empty");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Discarding malformed stored value");
            None
        }
    }
}

/// Encode and write `value` under `key`, logging instead of failing.
pub fn save_json<T: Serialize + ?Sized>(storage: &dyn KeyValueStorage, key: &str, value: &T) {
    let result = serde_json::to_string(value)
        .map_err(TrackerError::from)
        .and_then(|raw| storage.set(key, &raw));

    if let Err(e) = result {
        warn!(key, error = %e, "Failed to persist value");
    }
}

/// Remove `key`, logging instead of failing.
pub fn remove_key(storage: &dyn KeyValueStorage, key: &str) {
    if let Err(e) = storage.remove(key) {
        warn!(key, error = %e, "Failed to remove stored value");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_key() {
        let storage = InMemoryStorage::new();
        let value: Option<Vec<u32>> = load_json(&storage, "nothing");
        assert!(value.is_none());
    }

    #[test]
    fn test_load_malformed_fails_open() {
        let storage = InMemoryStorage::new();
        storage.set("numbers", "{not json").unwrap();

        let value: Option<Vec<u32>> = load_json(&storage, "numbers");
        assert!(value.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let storage = InMemoryStorage::new();
        save_json(&storage, "numbers", &vec![1u32, 2, 3]);

        let value: Option<Vec<u32>> = load_json(&storage, "numbers");
        assert_eq!(value, Some(vec![1, 2, 3]));

        remove_key(&storage, "numbers");
        assert!(storage.get("numbers").unwrap().is_none());
    }
}
