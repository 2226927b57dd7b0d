//! # Sync Engine
//!
//! Bidirectional synchronization between the local feature store and the
//! collection server.
//!
//! ## Overview
//!
//! This module owns the push+pull protocol and the policy of when to run it:
//! - Wire payloads for `POST /{project_id}/sync-features`, nested features
//!   with points, keyed by `client_id` for idempotent retry
//! - Per-project round trips that merge the server's canonical records back
//!   into local storage and never leave it partially updated
//! - Background triggering on connectivity return, foreground transitions,
//!   and a periodic interval, with a single-flight guard
//!
//! ## Components
//!
//! - **Protocol** (`protocol`): request/response payloads and model conversions
//! - **Sync Client** (`client`): one push+pull round trip per project
//! - **Sync Manager** (`manager`): trigger listeners, single-flight gate,
//!   start/stop lifecycle

pub mod client;
pub mod error;
pub mod manager;
pub mod protocol;

pub use client::{SyncClient, SyncClientConfig, SyncResult};
pub use error::{Result, SyncError};
pub use manager::{CombinedSyncResult, SyncManager, SyncManagerConfig};
pub use protocol::{
    CatalogResponse, FeaturePayload, PointPayload, ServerFeature, ServerPoint, SyncRequest,
    SyncResponse,
};
