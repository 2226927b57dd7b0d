//! Key-Value Storage Abstraction
//!
//! Provides a platform-agnostic trait for durable key-value storage. The core
//! stores per-project feature partitions as JSON blobs plus a handful of sync
//! metadata values under namespaced string keys, all of which must survive
//! process restarts.

use async_trait::async_trait;

use crate::error::Result;

/// Durable key-value storage trait
///
/// Abstracts platform-specific persistence:
/// - iOS: UserDefaults / file-backed store
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite-backed key-value table
///
/// # Semantics
///
/// - `get_*` on a missing key returns `Ok(None)`, never an error.
/// - `set_*` overwrites any previous value for the key.
/// - Writes must be durable once the future resolves; the core performs its
///   own read-back verification for critical partitions.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn save_partition(store: &dyn KeyValueStore, json: &str) -> Result<()> {
///     store.set_string("features:42", json).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all stored keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all keys
    ///
    /// Use with caution! This removes every stored value.
    async fn clear_all(&self) -> Result<()>;
}
