//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest`
//! - `KeyValueStore` using a SQLite-backed table
//! - `NetworkMonitor` using a TCP connectivity probe with polled change events
//! - `LifecycleObserver` as no-op (desktop always foreground)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteKeyValueStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let kv = SqliteKeyValueStore::new("data/collection.db".into()).await?;
//!
//!     // Inject into the store and sync engine
//! }
//! ```

mod http;
mod kv;
mod lifecycle;
mod network;

pub use http::ReqwestHttpClient;
pub use kv::SqliteKeyValueStore;
pub use lifecycle::DesktopLifecycleObserver;
pub use network::DesktopNetworkMonitor;
