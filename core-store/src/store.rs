//! # Feature Store
//!
//! Project-scoped persistence for `CollectedFeature` trees with atomic
//! read-modify-write semantics per partition.
//!
//! ## Overview
//!
//! The store keeps one JSON partition per project plus a device-wide
//! active-projects index and per-project sync metadata. Every mutation goes
//! through [`KvFeatureStore::update_partition`]: read the partition, apply a
//! closure, write it back, verify the write landed with a read-back check, and
//! retry a bounded number of times before surfacing a
//! [`StoreError::PersistenceVerification`].
//!
//! ## Concurrency
//!
//! Partitions are guarded by a per-project async mutex so that a merge from
//! the sync engine can never interleave with a save from the collection
//! workflow on the same project. The active-projects index has its own lock
//! and is always updated relative to partition changes (register before first
//! write, deregister after last record removed).

use async_trait::async_trait;
use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::models::{ClientId, CollectedFeature, CollectedPoint, FeatureType};

/// Storage key layout, namespaced by project id.
mod keys {
    pub const ACTIVE_PROJECTS: &str = "active_projects";

    pub fn features(project_id: i64) -> String {
        format!("features:{}", project_id)
    }

    pub fn feature_types(project_id: i64) -> String {
        format!("feature_types:{}", project_id)
    }

    pub fn last_sync(project_id: i64) -> String {
        format!("last_sync:{}", project_id)
    }

    pub fn unsynced_count(project_id: i64) -> String {
        format!("unsynced_count:{}", project_id)
    }
}

/// How many times a partition write is re-attempted when the read-back check
/// does not observe it.
const WRITE_RETRY_BUDGET: u32 = 3;

// ============================================================================
// Store trait
// ============================================================================

/// Local feature store contract.
///
/// Injected as `Arc<dyn FeatureStore>` into the sync engine and the
/// collection workflow so tests can substitute a mock. All operations are
/// scoped by `project_id` unless noted.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Upsert a feature by `client_id`.
    ///
    /// When the feature already exists, server-assigned fields (feature `id`,
    /// point `id`s) are merged in while local-only edits are preserved: the
    /// incoming points are folded in by point `client_id`, and an empty
    /// incoming points array leaves the stored points untouched. Returns the
    /// merged record as persisted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PersistenceVerification`] when the write cannot
    /// be confirmed after the retry budget; callers must treat local state as
    /// unknown and re-read before proceeding.
    async fn save_feature(&self, feature: CollectedFeature) -> Result<CollectedFeature>;

    /// Upsert a point by `client_id`, finding or creating its owning feature.
    ///
    /// When no stored feature contains the point and no `owner` is supplied,
    /// one is synthesized from the point's attributes
    /// (`feature_type_id`/`feature_name` keys when present).
    async fn save_point(
        &self,
        project_id: i64,
        point: CollectedPoint,
        owner: Option<CollectedFeature>,
    ) -> Result<()>;

    /// All features for the project, active and inactive.
    async fn features_for_project(&self, project_id: i64) -> Result<Vec<CollectedFeature>>;

    /// Features pending push: no server id, or any point without one.
    async fn unsynced_features(&self, project_id: i64) -> Result<Vec<CollectedFeature>>;

    /// Active points of active features, flattened in feature order.
    async fn active_points(&self, project_id: i64) -> Result<Vec<CollectedPoint>>;

    /// Mark all contained points inactive, then drop the feature record.
    ///
    /// Deregisters the project from the active-projects index when the
    /// partition becomes empty.
    async fn remove_feature(&self, project_id: i64, client_id: &ClientId) -> Result<()>;

    /// Hard-delete the project partition, its cached catalog, and its sync
    /// metadata keys. Used for storage resets, not the normal deletion flow.
    async fn clear_project_features(&self, project_id: i64) -> Result<()>;

    /// Add the project to the active-projects index. Idempotent.
    async fn register_active_project(&self, project_id: i64) -> Result<()>;

    /// Remove the project from the active-projects index. Idempotent.
    async fn unregister_active_project(&self, project_id: i64) -> Result<()>;

    /// Projects currently holding local feature data.
    async fn active_projects(&self) -> Result<Vec<i64>>;

    /// Replace the cached feature-type catalog for the project.
    async fn save_feature_types(&self, project_id: i64, types: &[FeatureType]) -> Result<()>;

    /// Cached feature-type catalog; empty when never fetched.
    async fn feature_types(&self, project_id: i64) -> Result<Vec<FeatureType>>;

    /// Persist the server-reported timestamp of the last successful sync.
    async fn set_last_sync(&self, project_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Timestamp of the last successful sync, if any.
    async fn last_sync(&self, project_id: i64) -> Result<Option<DateTime<Utc>>>;

    /// Last persisted unsynced-feature count.
    async fn unsynced_count(&self, project_id: i64) -> Result<i64>;

    /// Recount unsynced features, persist and return the result.
    async fn recompute_unsynced_count(&self, project_id: i64) -> Result<i64>;

    /// Full-device wipe: clear every partition listed in the active-projects
    /// index, then the index itself.
    async fn clear_all_data(&self) -> Result<()>;
}

// ============================================================================
// Key-value implementation
// ============================================================================

/// `FeatureStore` over a host [`KeyValueStore`].
pub struct KvFeatureStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// Per-project write locks; created lazily, never removed.
    partition_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    /// Guards the active-projects index.
    index_lock: Mutex<()>,
    write_retry_budget: u32,
}

impl KvFeatureStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            clock,
            partition_locks: Mutex::new(HashMap::new()),
            index_lock: Mutex::new(()),
            write_retry_budget: WRITE_RETRY_BUDGET,
        }
    }

    async fn partition_lock(&self, project_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.partition_locks.lock().await;
        locks
            .entry(project_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_partition(&self, project_id: i64) -> Result<Vec<CollectedFeature>> {
        match self.kv.get_string(&keys::features(project_id)).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Write `payload` under `key`, confirm it with a read-back check, and
    /// retry up to the budget when the check fails or the backend errors.
    async fn verified_set(&self, key: &str, payload: &str) -> Result<()> {
        for attempt in 1..=self.write_retry_budget {
            if let Err(e) = self.kv.set_string(key, payload).await {
                warn!(key, attempt, error = %e, "Partition write failed");
                continue;
            }
            match self.kv.get_string(key).await {
                Ok(Some(read_back)) if read_back == payload => {
                    debug!(key, attempt, bytes = payload.len(), "Partition write verified");
                    return Ok(());
                }
                Ok(_) => warn!(key, attempt, "Read-back check did not match written value"),
                Err(e) => warn!(key, attempt, error = %e, "Read-back check failed"),
            }
        }
        Err(StoreError::PersistenceVerification {
            key: key.to_string(),
            attempts: self.write_retry_budget,
        })
    }

    /// The transactional primitive every mutation goes through: read the
    /// partition, apply `apply`, write back with verification, all under the
    /// project's write lock.
    async fn update_partition<F, R>(&self, project_id: i64, apply: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<CollectedFeature>) -> R + Send,
        R: Send,
    {
        let lock = self.partition_lock(project_id).await;
        let _guard = lock.lock().await;

        let mut features = self.read_partition(project_id).await?;
        let out = apply(&mut features);
        let payload = serde_json::to_string(&features)?;
        self.verified_set(&keys::features(project_id), &payload)
            .await?;
        Ok(out)
    }

    async fn read_index(&self) -> Result<Vec<i64>> {
        match self.kv.get_string(keys::ACTIVE_PROJECTS).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_index(&self, projects: &[i64]) -> Result<()> {
        let payload = serde_json::to_string(projects)?;
        self.verified_set(keys::ACTIVE_PROJECTS, &payload).await
    }
}

/// Fold server-assigned fields from `incoming` into `existing` without losing
/// local-only edits. The merge key is the point `client_id`; stored points
/// absent from `incoming` are retained.
fn merge_feature(
    existing: &mut CollectedFeature,
    incoming: CollectedFeature,
    now: DateTime<Utc>,
) {
    debug_assert_eq!(existing.client_id, incoming.client_id);

    if matches!(incoming.id, Some(id) if id != 0) {
        existing.id = incoming.id;
    }
    existing.feature_type_id = incoming.feature_type_id;
    existing.name = incoming.name;
    existing.attributes = incoming.attributes;
    existing.is_active = incoming.is_active;

    // Points are taken from the incoming record only when non-empty,
    // otherwise retained as stored.
    if !incoming.points.is_empty() {
        for point in incoming.points {
            match existing
                .points
                .iter_mut()
                .find(|p| p.client_id == point.client_id)
            {
                Some(stored) => merge_point(stored, point),
                None => existing.points.push(point),
            }
        }
    }

    existing.updated_by = incoming.updated_by.or(existing.updated_by);
    existing.updated_at = now;
}

fn merge_point(existing: &mut CollectedPoint, incoming: CollectedPoint) {
    if incoming.id.is_some() {
        existing.id = incoming.id;
    }
    if incoming.feature_id.is_some() {
        existing.feature_id = incoming.feature_id;
    }
    existing.coordinates = incoming.coordinates;
    existing.attributes = incoming.attributes;
    existing.is_active = incoming.is_active;
    existing.updated_by = incoming.updated_by.or(existing.updated_by);
    existing.updated_at = incoming.updated_at;
}

/// Build an owning feature for an orphan point from whatever the capture
/// workflow stashed in its attributes.
fn synthesize_owner(
    point: &CollectedPoint,
    project_id: i64,
    now: DateTime<Utc>,
) -> CollectedFeature {
    let feature_type_id = point
        .attributes
        .get("feature_type_id")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let mut feature = CollectedFeature::new(project_id, feature_type_id, now);
    if let Some(name) = point.attributes.get("feature_name").and_then(|v| v.as_str()) {
        feature.name = Some(name.to_string());
    }
    feature
}

#[async_trait]
impl FeatureStore for KvFeatureStore {
    async fn save_feature(&self, feature: CollectedFeature) -> Result<CollectedFeature> {
        let project_id = feature.project_id;
        // Register before the first write so the index never misses a
        // partition that holds data.
        self.register_active_project(project_id).await?;

        let now = self.clock.now();
        self.update_partition(project_id, move |features| {
            match features
                .iter_mut()
                .find(|f| f.client_id == feature.client_id)
            {
                Some(existing) => {
                    merge_feature(existing, feature, now);
                    existing.clone()
                }
                None => {
                    let mut inserted = feature;
                    inserted.updated_at = now;
                    features.push(inserted.clone());
                    inserted
                }
            }
        })
        .await
    }

    async fn save_point(
        &self,
        project_id: i64,
        point: CollectedPoint,
        owner: Option<CollectedFeature>,
    ) -> Result<()> {
        self.register_active_project(project_id).await?;

        let now = self.clock.now();
        self.update_partition(project_id, move |features| {
            // An existing feature already owning this point wins over any
            // caller-supplied owner.
            if let Some(holder) = features
                .iter_mut()
                .find(|f| f.points.iter().any(|p| p.client_id == point.client_id))
            {
                if let Some(stored) = holder
                    .points
                    .iter_mut()
                    .find(|p| p.client_id == point.client_id)
                {
                    merge_point(stored, point);
                }
                holder.updated_at = now;
                return;
            }

            match owner {
                Some(owner) => {
                    match features
                        .iter_mut()
                        .find(|f| f.client_id == owner.client_id)
                    {
                        Some(existing) => {
                            existing.points.push(point);
                            existing.updated_at = now;
                        }
                        None => {
                            let mut created = owner;
                            created.points.push(point);
                            created.updated_at = now;
                            features.push(created);
                        }
                    }
                }
                None => {
                    let mut created = synthesize_owner(&point, project_id, now);
                    created.points.push(point);
                    features.push(created);
                }
            }
        })
        .await
    }

    async fn features_for_project(&self, project_id: i64) -> Result<Vec<CollectedFeature>> {
        self.read_partition(project_id).await
    }

    async fn unsynced_features(&self, project_id: i64) -> Result<Vec<CollectedFeature>> {
        Ok(self
            .read_partition(project_id)
            .await?
            .into_iter()
            .filter(CollectedFeature::is_unsynced)
            .collect())
    }

    async fn active_points(&self, project_id: i64) -> Result<Vec<CollectedPoint>> {
        Ok(self
            .read_partition(project_id)
            .await?
            .into_iter()
            .filter(|f| f.is_active)
            .flat_map(|f| f.points.into_iter().filter(|p| p.is_active))
            .collect())
    }

    async fn remove_feature(&self, project_id: i64, client_id: &ClientId) -> Result<()> {
        let target = client_id.clone();
        let remaining = self
            .update_partition(project_id, move |features| {
                if let Some(feature) = features.iter_mut().find(|f| f.client_id == target) {
                    for point in &mut feature.points {
                        point.is_active = false;
                    }
                }
                features.retain(|f| f.client_id != target);
                features.len()
            })
            .await?;

        if remaining == 0 {
            self.unregister_active_project(project_id).await?;
        }
        Ok(())
    }

    async fn clear_project_features(&self, project_id: i64) -> Result<()> {
        let lock = self.partition_lock(project_id).await;
        let _guard = lock.lock().await;

        self.kv.delete(&keys::features(project_id)).await?;
        self.kv.delete(&keys::feature_types(project_id)).await?;
        self.kv.delete(&keys::last_sync(project_id)).await?;
        self.kv.delete(&keys::unsynced_count(project_id)).await?;
        drop(_guard);

        self.unregister_active_project(project_id).await?;
        debug!(project_id, "Cleared project partition and sync metadata");
        Ok(())
    }

    async fn register_active_project(&self, project_id: i64) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut projects = self.read_index().await?;
        if !projects.contains(&project_id) {
            projects.push(project_id);
            projects.sort_unstable();
            self.write_index(&projects).await?;
            debug!(project_id, "Registered active project");
        }
        Ok(())
    }

    async fn unregister_active_project(&self, project_id: i64) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut projects = self.read_index().await?;
        if projects.contains(&project_id) {
            projects.retain(|p| *p != project_id);
            self.write_index(&projects).await?;
            debug!(project_id, "Unregistered active project");
        }
        Ok(())
    }

    async fn active_projects(&self) -> Result<Vec<i64>> {
        self.read_index().await
    }

    async fn save_feature_types(&self, project_id: i64, types: &[FeatureType]) -> Result<()> {
        let payload = serde_json::to_string(types)?;
        self.verified_set(&keys::feature_types(project_id), &payload)
            .await
    }

    async fn feature_types(&self, project_id: i64) -> Result<Vec<FeatureType>> {
        match self.kv.get_string(&keys::feature_types(project_id)).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn set_last_sync(&self, project_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.kv
            .set_string(&keys::last_sync(project_id), &at.to_rfc3339())
            .await?;
        Ok(())
    }

    async fn last_sync(&self, project_id: i64) -> Result<Option<DateTime<Utc>>> {
        match self.kv.get_string(&keys::last_sync(project_id)).await? {
            Some(s) => Ok(DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))),
            None => Ok(None),
        }
    }

    async fn unsynced_count(&self, project_id: i64) -> Result<i64> {
        Ok(self
            .kv
            .get_i64(&keys::unsynced_count(project_id))
            .await?
            .unwrap_or(0))
    }

    async fn recompute_unsynced_count(&self, project_id: i64) -> Result<i64> {
        let count = self.unsynced_features(project_id).await?.len() as i64;
        self.kv
            .set_i64(&keys::unsynced_count(project_id), count)
            .await?;
        Ok(count)
    }

    async fn clear_all_data(&self) -> Result<()> {
        for project_id in self.active_projects().await? {
            self.clear_project_features(project_id).await?;
        }
        self.kv.delete(keys::ACTIVE_PROJECTS).await?;
        debug!("Cleared all local collection data");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
