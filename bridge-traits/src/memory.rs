//! In-memory key-value store
//!
//! Non-durable [`KeyValueStore`] implementation backed by a `HashMap`. Used by
//! tests across the workspace and by host shells that do not need persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{BridgeError, Result};
use crate::storage::KeyValueStore;

#[derive(Debug, Clone, PartialEq)]
enum Stored {
    Str(String),
    I64(i64),
}

/// HashMap-backed key-value store. Values do not survive the process.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    data: Mutex<HashMap<String, Stored>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .lock()
            .expect("memory store lock poisoned")
            .insert(key.to_string(), Stored::Str(value.to_string()));
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.data.lock().expect("memory store lock poisoned").get(key) {
            Some(Stored::Str(s)) => Ok(Some(s.clone())),
            Some(Stored::I64(_)) => Err(BridgeError::StorageError(format!(
                "Type mismatch for key {}: expected string, got i64",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.data
            .lock()
            .expect("memory store lock poisoned")
            .insert(key.to_string(), Stored::I64(value));
        Ok(())
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.data.lock().expect("memory store lock poisoned").get(key) {
            Some(Stored::I64(v)) => Ok(Some(*v)),
            Some(Stored::Str(_)) => Err(BridgeError::StorageError(format!(
                "Type mismatch for key {}: expected i64, got string",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data
            .lock()
            .expect("memory store lock poisoned")
            .remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self
            .data
            .lock()
            .expect("memory store lock poisoned")
            .contains_key(key))
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .data
            .lock()
            .expect("memory store lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear_all(&self) -> Result<()> {
        self.data
            .lock()
            .expect("memory store lock poisoned")
            .clear();
        Ok(())
    }
}
