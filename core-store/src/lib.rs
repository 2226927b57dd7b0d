//! # Local Feature Store
//!
//! Durable, project-scoped persistence for collected field data.
//!
//! ## Overview
//!
//! This crate holds the offline half of the collection workflow:
//! - The data model: [`FeatureType`] catalog entries and [`CollectedFeature`]
//!   trees (feature → ordered points)
//! - [`ClientId`] generation for offline-safe identity
//! - The [`FeatureStore`] trait and its [`KvFeatureStore`] implementation over
//!   a [`bridge_traits::KeyValueStore`]
//!
//! ## Components
//!
//! - **Models** (`models`): feature/point types with the "unsynced" predicate
//! - **Store** (`store`): per-project partitions, active-projects index, sync
//!   metadata, and the verified read-modify-write primitive
//!
//! ## Storage layout
//!
//! All state lives under namespaced string keys in the host key-value store:
//!
//! | Key                         | Contents                               |
//! |-----------------------------|----------------------------------------|
//! | `features:{project_id}`     | JSON array of `CollectedFeature`       |
//! | `feature_types:{project_id}`| JSON array of `FeatureType`            |
//! | `active_projects`           | JSON array of project ids              |
//! | `last_sync:{project_id}`    | RFC3339 timestamp of last server sync  |
//! | `unsynced_count:{project_id}`| number of features pending push       |

pub mod error;
pub mod models;
pub mod store;

pub use error::{Result, StoreError};
pub use models::{
    ClientId, CollectedFeature, CollectedPoint, Coordinates, FeatureType, GeometryType,
};
pub use store::{FeatureStore, KvFeatureStore};
