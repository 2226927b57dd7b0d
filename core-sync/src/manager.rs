//! # Sync Manager
//!
//! Decides *when* to sync; the [`SyncClient`] decides *how*.
//!
//! ## Triggers
//!
//! - App returns to the foreground and unsynced changes exist
//! - Connectivity returns (disconnect → connect transition) and unsynced
//!   changes exist
//! - Periodic interval tick (default 15 minutes) and unsynced changes exist
//! - [`SyncManager::sync_now`], which bypasses the unsynced-changes gate
//!
//! ## Single flight
//!
//! One sync pass at a time, guarded by an atomic compare-and-swap. Triggers
//! arriving while a pass is running are dropped, not queued; the next trigger
//! is the retry. The flag is released on every exit path, including store
//! errors mid-pass.
//!
//! ## Lifecycle
//!
//! [`SyncManager::start`] subscribes to the network and lifecycle change
//! streams and spawns the trigger listeners; [`SyncManager::stop`] cancels
//! them deterministically through a `CancellationToken`.

use bridge_traits::lifecycle::{LifecycleObserver, LifecycleState};
use bridge_traits::network::{NetworkMonitor, NetworkStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{SyncClient, SyncResult};
use crate::error::Result;
use core_store::FeatureStore;

/// Sync manager configuration
#[derive(Debug, Clone)]
pub struct SyncManagerConfig {
    /// Interval between periodic background sync attempts
    pub sync_interval: Duration,
}

impl Default for SyncManagerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Outcome of one sync pass across all active projects.
#[derive(Debug, Clone, Default)]
pub struct CombinedSyncResult {
    pub results: Vec<SyncResult>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Releases the single-flight flag when the pass ends, on any path.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Background sync orchestrator.
///
/// Constructed with injected bridges and the shared [`FeatureStore`] so every
/// collaborator can be substituted in tests.
pub struct SyncManager {
    store: Arc<dyn FeatureStore>,
    client: Arc<SyncClient>,
    network: Arc<dyn NetworkMonitor>,
    lifecycle: Arc<dyn LifecycleObserver>,
    config: SyncManagerConfig,
    syncing: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        client: Arc<SyncClient>,
        network: Arc<dyn NetworkMonitor>,
        lifecycle: Arc<dyn LifecycleObserver>,
        config: SyncManagerConfig,
    ) -> Self {
        Self {
            store,
            client,
            network,
            lifecycle,
            config,
            syncing: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    /// Spawn the trigger listeners. Idempotent; a second call while running
    /// is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.cancel.lock().await;
        if guard.is_some() {
            debug!("Sync manager already started");
            return Ok(());
        }

        let token = CancellationToken::new();
        let mut network_stream = self.network.subscribe_changes().await?;
        let mut lifecycle_stream = self.lifecycle.subscribe_changes().await?;

        // Connectivity listener: fire on the disconnect -> connect edge
        let manager = Arc::clone(self);
        let cancelled = token.clone();
        tokio::spawn(async move {
            let mut was_connected = manager.network.is_connected().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    info = network_stream.next() => {
                        let Some(info) = info else { break };
                        let connected = info.status == NetworkStatus::Connected;
                        if connected && !was_connected {
                            manager.maybe_sync("reconnect").await;
                        }
                        was_connected = connected;
                    }
                }
            }
        });

        // Lifecycle listener: fire when the app comes back to the foreground
        let manager = Arc::clone(self);
        let cancelled = token.clone();
        tokio::spawn(async move {
            let mut last_state = manager
                .lifecycle
                .get_state()
                .await
                .unwrap_or(LifecycleState::Foreground);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    state = lifecycle_stream.next() => {
                        let Some(state) = state else { break };
                        if state == LifecycleState::Foreground
                            && last_state != LifecycleState::Foreground
                        {
                            manager.maybe_sync("foreground").await;
                        }
                        last_state = state;
                    }
                }
            }
        });

        // Periodic tick
        let manager = Arc::clone(self);
        let cancelled = token.clone();
        let interval = self.config.sync_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        manager.maybe_sync("interval").await;
                    }
                }
            }
        });

        *guard = Some(token);
        info!(interval_secs = interval.as_secs(), "Sync manager started");
        Ok(())
    }

    /// Cancel the trigger listeners. A pass already in flight runs to
    /// completion.
    pub async fn stop(&self) {
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
            info!("Sync manager stopped");
        }
    }

    /// Whether a sync pass is currently running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// True when any active project has features pending push.
    pub async fn has_unsynced_changes(&self) -> Result<bool> {
        for project_id in self.store.active_projects().await? {
            if !self.store.unsynced_features(project_id).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Manually requested sync; skips the unsynced-changes gate so a pull of
    /// server-side changes happens even when nothing is pending locally.
    ///
    /// Returns `Ok(None)` when a pass is already in flight.
    pub async fn sync_now(&self) -> Result<Option<CombinedSyncResult>> {
        self.sync_all("manual").await
    }

    /// Gated trigger entry: sync only when something is pending.
    async fn maybe_sync(&self, trigger: &str) {
        match self.has_unsynced_changes().await {
            Ok(true) => {
                if let Err(error) = self.sync_all(trigger).await {
                    warn!(trigger, %error, "Sync pass failed");
                }
            }
            Ok(false) => debug!(trigger, "No unsynced changes, skipping"),
            Err(error) => warn!(trigger, %error, "Could not check for unsynced changes"),
        }
    }

    /// One pass over all active projects, sequentially. A per-project failure
    /// is recorded in the combined result and the loop continues; there is no
    /// intra-pass retry.
    async fn sync_all(&self, trigger: &str) -> Result<Option<CombinedSyncResult>> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!(trigger, "Sync already in progress, dropping trigger");
            return Ok(None);
        }
        let _flight = FlightGuard(&self.syncing);

        let projects = self.store.active_projects().await?;
        info!(trigger, projects = projects.len(), "Sync pass starting");

        let mut combined = CombinedSyncResult::default();
        for project_id in projects {
            let result = self.client.sync_project(project_id).await;
            if result.success {
                combined.succeeded += 1;
            } else {
                combined.failed += 1;
            }
            combined.results.push(result);
        }

        info!(
            trigger,
            succeeded = combined.succeeded,
            failed = combined.failed,
            "Sync pass complete"
        );
        Ok(Some(combined))
    }
}
