//! # Sync Wire Protocol
//!
//! Request and response payloads for the `POST /{project_id}/sync-features`
//! endpoint, plus the conversions between wire shapes and the local model.
//!
//! Features travel nested: each feature payload carries its points, and every
//! record is keyed by `client_id` so a retried push is idempotent on the
//! server. Coordinates travel as a `[longitude, latitude]` pair.

use chrono::{DateTime, Utc};
use core_store::{ClientId, CollectedFeature, CollectedPoint, Coordinates};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request
// ============================================================================

/// Push payload: everything unsynced, plus the last pull watermark so the
/// server can answer with only the changes since then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub features: Vec<FeaturePayload>,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePayload {
    pub client_id: ClientId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub feature_type_id: i64,
    pub project_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub points: Vec<PointPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub client_id: ClientId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// `[longitude, latitude]`
    pub coords: [f64; 2],
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeaturePayload {
    pub fn from_local(feature: &CollectedFeature) -> Self {
        Self {
            client_id: feature.client_id.clone(),
            id: feature.id.filter(|id| *id != 0),
            feature_type_id: feature.feature_type_id,
            project_id: feature.project_id,
            name: feature.name.clone(),
            attributes: feature.attributes.clone(),
            is_active: feature.is_active,
            created_at: feature.created_at,
            updated_at: feature.updated_at,
            points: feature.points.iter().map(PointPayload::from_local).collect(),
        }
    }
}

impl PointPayload {
    pub fn from_local(point: &CollectedPoint) -> Self {
        Self {
            client_id: point.client_id.clone(),
            id: point.id,
            coords: [point.coordinates.longitude, point.coordinates.latitude],
            attributes: point.attributes.clone(),
            is_active: point.is_active,
            created_at: point.created_at,
            updated_at: point.updated_at,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Server answer to a sync round trip.
///
/// `success: false` means the server processed nothing; the body carries no
/// canonical state in that case and the client must not mutate storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default)]
    pub features: Vec<ServerFeature>,
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Canonical server-side feature: the pushed shape plus assigned integer ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFeature {
    pub client_id: ClientId,
    #[serde(default)]
    pub id: Option<i64>,
    pub feature_type_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub updated_by: Option<i64>,
    #[serde(default)]
    pub points: Vec<ServerPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerPoint {
    pub client_id: ClientId,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub feature_id: Option<i64>,
    pub coords: [f64; 2],
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub updated_by: Option<i64>,
}

fn default_true() -> bool {
    true
}

/// Answer to the catalog fetch, `GET /{project_id}/feature-types`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogResponse {
    pub success: bool,
    #[serde(default)]
    pub feature_types: Vec<core_store::FeatureType>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ServerFeature {
    /// Convert to the local model for merging through the store.
    ///
    /// Server responses carry no creation timestamps; `now` fills the audit
    /// fields, and the store's merge keeps the stored `created_at` where the
    /// record already exists.
    pub fn into_local(self, project_id: i64, now: DateTime<Utc>) -> CollectedFeature {
        CollectedFeature {
            client_id: self.client_id,
            id: self.id,
            feature_type_id: self.feature_type_id,
            project_id,
            name: self.name,
            points: self
                .points
                .into_iter()
                .map(|p| p.into_local(now))
                .collect(),
            attributes: self.attributes,
            is_active: self.is_active,
            created_by: None,
            created_at: now,
            updated_by: self.updated_by,
            updated_at: now,
        }
    }
}

impl ServerPoint {
    pub fn into_local(self, now: DateTime<Utc>) -> CollectedPoint {
        CollectedPoint {
            client_id: self.client_id,
            id: self.id,
            feature_id: self.feature_id,
            coordinates: Coordinates::new(self.coords[0], self.coords[1]),
            attributes: self.attributes,
            is_active: self.is_active,
            created_by: None,
            created_at: now,
            updated_by: self.updated_by,
            updated_at: now,
        }
    }
}
