//! # Sync Client
//!
//! One push+pull round trip per project against the collection server.
//!
//! ## Round trip
//!
//! 1. Offline precondition: bail out before touching the network
//! 2. Read the unsynced set and the cached feature-type catalog
//! 3. `POST {base_url}/{project_id}/sync-features` with the push payload and
//!    the last pull watermark
//! 4. Transport failure or `success: false` → report, mutate nothing
//! 5. On success, merge each canonical server feature through the store
//!    (keyed by `client_id`), skipping features whose type is missing from
//!    the local catalog
//! 6. Persist the server timestamp and the recomputed unsynced count
//!
//! `sync_project` converts every failure into a [`SyncResult`]; the manager
//! never sees an `Err` cross this boundary.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::network::NetworkMonitor;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_store::FeatureStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use core_store::FeatureType;

use crate::error::SyncError;
use crate::protocol::{CatalogResponse, FeaturePayload, SyncRequest, SyncResponse};

/// Sync client configuration
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Server base URL, without a trailing slash
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl SyncClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one per-project sync round trip.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub project_id: i64,
    pub success: bool,
    /// Features pushed in the request
    pub synced: usize,
    /// Canonical features returned by the server
    pub pulled: usize,
    /// Features merged into local storage
    pub merged: usize,
    /// Features the server returned that could not be merged
    pub failed: usize,
    /// Unsynced features left after the round trip
    pub remaining_unsynced: i64,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SyncResult {
    fn failure(project_id: i64, pushed: usize, remaining: i64, error: &SyncError) -> Self {
        Self {
            project_id,
            success: false,
            synced: pushed,
            pulled: 0,
            merged: 0,
            failed: pushed,
            remaining_unsynced: remaining,
            server_timestamp: None,
            error_message: Some(error.to_string()),
        }
    }
}

/// Per-project push+pull executor.
pub struct SyncClient {
    store: Arc<dyn FeatureStore>,
    http: Arc<dyn HttpClient>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    config: SyncClientConfig,
}

impl SyncClient {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        http: Arc<dyn HttpClient>,
        network: Arc<dyn NetworkMonitor>,
        clock: Arc<dyn Clock>,
        config: SyncClientConfig,
    ) -> Self {
        Self {
            store,
            http,
            network,
            clock,
            config,
        }
    }

    /// Run one round trip for `project_id`.
    ///
    /// Never returns an error: every failure mode is folded into the
    /// returned [`SyncResult`] so the manager loop can keep iterating
    /// projects.
    #[instrument(skip(self))]
    pub async fn sync_project(&self, project_id: i64) -> SyncResult {
        match self.sync_project_inner(project_id).await {
            Ok(result) => result,
            Err(error) => {
                warn!(project_id, %error, "Sync round trip failed");
                let pushed = self
                    .store
                    .unsynced_features(project_id)
                    .await
                    .map(|f| f.len())
                    .unwrap_or(0);
                SyncResult::failure(project_id, pushed, pushed as i64, &error)
            }
        }
    }

    /// Fetch the feature-type catalog for `project_id` and cache it locally.
    ///
    /// The catalog is read-only reference data; a stale cache is acceptable
    /// while offline, so callers typically refresh it opportunistically when
    /// opening a project.
    #[instrument(skip(self))]
    pub async fn refresh_feature_types(
        &self,
        project_id: i64,
    ) -> Result<Vec<FeatureType>, SyncError> {
        if !self.network.is_connected().await {
            return Err(SyncError::Offline);
        }

        let url = format!("{}/{}/feature-types", self.config.base_url, project_id);
        let request =
            HttpRequest::new(HttpMethod::Get, url).timeout(self.config.request_timeout);
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        if !response.is_success() {
            return Err(SyncError::Transport(format!(
                "server returned status {}",
                response.status
            )));
        }
        let response: CatalogResponse = response
            .json()
            .map_err(|e| SyncError::Http(e.to_string()))?;
        if !response.success {
            let reason = response.error.unwrap_or_else(|| "unspecified".to_string());
            return Err(SyncError::ServerRejection(reason));
        }

        self.store
            .save_feature_types(project_id, &response.feature_types)
            .await?;
        debug!(
            project_id,
            count = response.feature_types.len(),
            "Cached feature-type catalog"
        );
        Ok(response.feature_types)
    }

    async fn sync_project_inner(&self, project_id: i64) -> Result<SyncResult, SyncError> {
        if !self.network.is_connected().await {
            return Err(SyncError::Offline);
        }

        let unsynced = self.store.unsynced_features(project_id).await?;
        let last_sync = self.store.last_sync(project_id).await?;
        debug!(
            project_id,
            pushing = unsynced.len(),
            ?last_sync,
            "Starting sync round trip"
        );

        let request_body = SyncRequest {
            features: unsynced.iter().map(FeaturePayload::from_local).collect(),
            last_sync_timestamp: last_sync,
        };
        let url = format!("{}/{}/sync-features", self.config.base_url, project_id);
        let request = HttpRequest::new(HttpMethod::Post, url)
            .json(&request_body)
            .map_err(|e| SyncError::Http(e.to_string()))?
            .timeout(self.config.request_timeout);

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        if !response.is_success() {
            return Err(SyncError::Transport(format!(
                "server returned status {}",
                response.status
            )));
        }
        let response: SyncResponse = response
            .json()
            .map_err(|e| SyncError::Http(e.to_string()))?;

        if !response.success {
            let reason = response.error.unwrap_or_else(|| "unspecified".to_string());
            return Err(SyncError::ServerRejection(reason));
        }

        // Known feature types; an empty set means the catalog was never
        // fetched, in which case nothing can be validated against it.
        let catalog: HashSet<i64> = self
            .store
            .feature_types(project_id)
            .await?
            .iter()
            .map(|t| t.id)
            .collect();

        let now = self.clock.now();
        let pulled = response.features.len();
        let mut merged = 0usize;
        let mut failed = 0usize;
        for server_feature in response.features {
            if !catalog.is_empty() && !catalog.contains(&server_feature.feature_type_id) {
                let inconsistency = SyncError::MergeInconsistency {
                    feature_type_id: server_feature.feature_type_id,
                };
                warn!(
                    project_id,
                    client_id = %server_feature.client_id,
                    %inconsistency,
                    "Skipping server feature"
                );
                failed += 1;
                continue;
            }
            self.store
                .save_feature(server_feature.into_local(project_id, now))
                .await?;
            merged += 1;
        }

        if let Some(server_time) = response.server_time {
            self.store.set_last_sync(project_id, server_time).await?;
        }
        let remaining = self.store.recompute_unsynced_count(project_id).await?;

        info!(
            project_id,
            pushed = unsynced.len(),
            pulled,
            merged,
            failed,
            remaining,
            "Sync round trip complete"
        );
        Ok(SyncResult {
            project_id,
            success: true,
            synced: unsynced.len(),
            pulled,
            merged,
            failed,
            remaining_unsynced: remaining,
            server_timestamp: response.server_time,
            error_message: None,
        })
    }
}
