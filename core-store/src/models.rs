//! # Collected Data Model
//!
//! Types describing what field workers collect: catalog entries
//! ([`FeatureType`]), collected geometry ([`CollectedFeature`]), and the
//! captured coordinates that make it up ([`CollectedPoint`]).
//!
//! ## Identity
//!
//! Every feature and point carries two identifiers:
//! - [`ClientId`]: generated locally at creation, globally unique, immutable.
//!   This is the merge key across devices and server.
//! - `id`: the server-assigned integer, `None` (or `Some(0)`) until the record
//!   has been pushed at least once.
//!
//! The "unsynced" predicate derives from the second identifier and nothing
//! else; there is no separate dirty flag to drift out of date.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

// ============================================================================
// Client-side identity
// ============================================================================

/// Client-generated identifier for features and points.
///
/// Generated without any network round-trip; collision probability across
/// devices and time is negligible (random UUID v4). Assigned exactly once at
/// creation and never mutated or reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a new globally-unique client id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Geometry kind of a collectible feature type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    Line,
    Polygon,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::Line => "Line",
            GeometryType::Polygon => "Polygon",
        }
    }
}

impl FromStr for GeometryType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Point" => Ok(GeometryType::Point),
            "Line" => Ok(GeometryType::Line),
            "Polygon" => Ok(GeometryType::Polygon),
            _ => Err(StoreError::InvalidGeometryType(s.to_string())),
        }
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog entry describing a collectible kind (water valve, com line, ...).
///
/// Fetched from the server per project and cached locally; the sync engine
/// treats the catalog as read-only reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureType {
    pub id: i64,
    pub name: String,
    /// Feature category (Water, Electric, Com, ...)
    pub category: String,
    pub geometry: GeometryType,
    pub color: Option<String>,
    pub svg: Option<String>,
    pub line_weight: Option<i64>,
    pub dash_pattern: Option<String>,
    pub draw_layer: String,
    /// Optional attribute-form schema shown at capture time
    pub form_schema: Option<serde_json::Value>,
    pub is_active: bool,
}

// ============================================================================
// Collected data
// ============================================================================

/// Longitude/latitude pair (WGS84), derived from a position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinates {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// One captured coordinate belonging to a feature.
///
/// `attributes` carries the raw position-fix payload (quality, accuracy
/// fields) recorded at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedPoint {
    pub client_id: ClientId,
    /// Server-assigned id; `None` until the first successful push
    pub id: Option<i64>,
    /// Back-reference to the server-side feature id, resolved after first sync
    pub feature_id: Option<i64>,
    pub coordinates: Coordinates,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl CollectedPoint {
    /// Create a new unsynced point at the given coordinates.
    pub fn new(coordinates: Coordinates, now: DateTime<Utc>) -> Self {
        Self {
            client_id: ClientId::generate(),
            id: None,
            feature_id: None,
            coordinates,
            attributes: serde_json::Map::new(),
            is_active: true,
            created_by: None,
            created_at: now,
            updated_by: None,
            updated_at: now,
        }
    }

    pub fn with_attributes(
        mut self,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.attributes = attributes;
        self
    }

    /// A point is unsynced until the server has assigned it an id.
    pub fn is_unsynced(&self) -> bool {
        self.id.is_none()
    }
}

/// The unit of collected work: a feature with its ordered points.
///
/// A Point-geometry feature has exactly one point; Line and Polygon features
/// have one point per vertex, in capture order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedFeature {
    pub client_id: ClientId,
    /// Server-assigned id; `None` or `Some(0)` means "not yet synced"
    pub id: Option<i64>,
    pub feature_type_id: i64,
    pub project_id: i64,
    pub name: Option<String>,
    pub points: Vec<CollectedPoint>,
    /// Open attribute bag, includes captured form answers
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Soft-delete flag; an inactive feature is retained until the server has
    /// been told
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl CollectedFeature {
    /// Create a new unsynced feature with no points yet.
    pub fn new(project_id: i64, feature_type_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            client_id: ClientId::generate(),
            id: None,
            feature_type_id,
            project_id,
            name: None,
            points: Vec::new(),
            attributes: serde_json::Map::new(),
            is_active: true,
            created_by: None,
            created_at: now,
            updated_by: None,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_points(mut self, points: Vec<CollectedPoint>) -> Self {
        self.points = points;
        self
    }

    /// The single source of truth for what the push phase must send.
    ///
    /// A feature is unsynced iff it has no server id (or the 0 placeholder
    /// some backends emit) or any contained point has no server id.
    pub fn is_unsynced(&self) -> bool {
        !matches!(self.id, Some(id) if id != 0) || self.points.iter().any(CollectedPoint::is_unsynced)
    }

    /// Logically deleted: inactive itself, or every point inactive.
    ///
    /// Deleted features remain in storage until the deletion has been synced.
    pub fn is_deleted(&self) -> bool {
        !self.is_active
            || (!self.points.is_empty() && self.points.iter().all(|p| !p.is_active))
    }

    /// Active points of this feature, in capture order.
    pub fn active_points(&self) -> impl Iterator<Item = &CollectedPoint> {
        self.points.iter().filter(|p| p.is_active)
    }
}
