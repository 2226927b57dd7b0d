//! Integration tests for the sync engine
//!
//! These tests verify the complete sync workflow including:
//! - Push+pull round trip with server id assignment
//! - Offline, transport-failure, and server-rejection no-ops
//! - Merge-inconsistency skipping
//! - Manager triggers, gating, and single-flight behavior

use bridge_traits::{
    error::BridgeError,
    lifecycle::{LifecycleChangeStream, LifecycleObserver, LifecycleState},
    memory::MemoryKeyValueStore,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
    time::SystemClock,
    HttpClient, HttpRequest, HttpResponse,
};
use bytes::Bytes;
use chrono::Utc;
use core_store::{
    CollectedFeature, CollectedPoint, Coordinates, FeatureStore, FeatureType, GeometryType,
    KvFeatureStore,
};
use core_sync::{SyncClient, SyncClientConfig, SyncManager, SyncManagerConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;

// ============================================================================
// Mock Implementations
// ============================================================================

/// Mock HTTP client with a queue of scripted responses.
struct MockHttpClient {
    responses: AsyncMutex<VecDeque<Result<HttpResponse, BridgeError>>>,
    requests: AsyncMutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl MockHttpClient {
    fn new() -> Self {
        Self {
            responses: AsyncMutex::new(VecDeque::new()),
            requests: AsyncMutex::new(Vec::new()),
            delay: None,
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    async fn push_response(&self, response: Result<HttpResponse, BridgeError>) {
        self.responses.lock().await.push_back(response);
    }

    async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn last_request_body(&self) -> serde_json::Value {
        let requests = self.requests.lock().await;
        let body = requests
            .last()
            .and_then(|r| r.body.clone())
            .expect("request with body");
        serde_json::from_slice(&body).unwrap()
    }
}

#[async_trait::async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse> {
        self.requests.lock().await.push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.responses.lock().await.pop_front() {
            Some(response) => response,
            // Scripted queue exhausted: answer with an empty success
            None => Ok(json_response(serde_json::json!({
                "success": true,
                "features": [],
                "server_time": Utc::now().to_rfc3339(),
            }))),
        }
    }
}

fn json_response(body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: HashMap::new(),
        body: Bytes::from(serde_json::to_vec(&body).unwrap()),
    }
}

/// Mock network monitor with a switchable flag and manual change events.
struct MockNetworkMonitor {
    connected: AtomicBool,
    senders: AsyncMutex<Vec<UnboundedSender<NetworkInfo>>>,
}

impl MockNetworkMonitor {
    fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            senders: AsyncMutex::new(Vec::new()),
        }
    }

    async fn emit(&self, status: NetworkStatus) {
        self.connected
            .store(status == NetworkStatus::Connected, Ordering::SeqCst);
        let info = NetworkInfo {
            status,
            network_type: Some(NetworkType::WiFi),
            is_metered: false,
        };
        for sender in self.senders.lock().await.iter() {
            let _ = sender.send(info.clone());
        }
    }
}

#[async_trait::async_trait]
impl NetworkMonitor for MockNetworkMonitor {
    async fn get_network_info(&self) -> bridge_traits::error::Result<NetworkInfo> {
        let status = if self.connected.load(Ordering::SeqCst) {
            NetworkStatus::Connected
        } else {
            NetworkStatus::Disconnected
        };
        Ok(NetworkInfo {
            status,
            network_type: Some(NetworkType::WiFi),
            is_metered: false,
        })
    }

    async fn subscribe_changes(
        &self,
    ) -> bridge_traits::error::Result<Box<dyn NetworkChangeStream>> {
        let (tx, rx) = unbounded_channel();
        self.senders.lock().await.push(tx);
        Ok(Box::new(ChannelNetworkStream(rx)))
    }
}

struct ChannelNetworkStream(UnboundedReceiver<NetworkInfo>);

#[async_trait::async_trait]
impl NetworkChangeStream for ChannelNetworkStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.0.recv().await
    }
}

/// Mock lifecycle observer with manual state transitions.
struct MockLifecycleObserver {
    state: AsyncMutex<LifecycleState>,
    senders: AsyncMutex<Vec<UnboundedSender<LifecycleState>>>,
}

impl MockLifecycleObserver {
    fn new(state: LifecycleState) -> Self {
        Self {
            state: AsyncMutex::new(state),
            senders: AsyncMutex::new(Vec::new()),
        }
    }

    async fn emit(&self, state: LifecycleState) {
        *self.state.lock().await = state;
        for sender in self.senders.lock().await.iter() {
            let _ = sender.send(state);
        }
    }
}

#[async_trait::async_trait]
impl LifecycleObserver for MockLifecycleObserver {
    async fn get_state(&self) -> bridge_traits::error::Result<LifecycleState> {
        Ok(*self.state.lock().await)
    }

    async fn subscribe_changes(
        &self,
    ) -> bridge_traits::error::Result<Box<dyn LifecycleChangeStream>> {
        let (tx, rx) = unbounded_channel();
        self.senders.lock().await.push(tx);
        Ok(Box::new(ChannelLifecycleStream(rx)))
    }
}

struct ChannelLifecycleStream(UnboundedReceiver<LifecycleState>);

#[async_trait::async_trait]
impl LifecycleChangeStream for ChannelLifecycleStream {
    async fn next(&mut self) -> Option<LifecycleState> {
        self.0.recv().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn new_store() -> Arc<dyn FeatureStore> {
    Arc::new(KvFeatureStore::new(
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(SystemClock),
    ))
}

fn new_client(
    store: Arc<dyn FeatureStore>,
    http: Arc<MockHttpClient>,
    network: Arc<MockNetworkMonitor>,
) -> SyncClient {
    SyncClient::new(
        store,
        http,
        network,
        Arc::new(SystemClock),
        SyncClientConfig::new("http://server.test"),
    )
}

fn unsynced_feature(project_id: i64) -> CollectedFeature {
    let now = Utc::now();
    let point = CollectedPoint::new(Coordinates::new(-111.89, 40.76), now);
    CollectedFeature::new(project_id, 3, now).with_points(vec![point])
}

fn catalog_entry(id: i64) -> FeatureType {
    FeatureType {
        id,
        name: "Water Valve".to_string(),
        category: "Water".to_string(),
        geometry: GeometryType::Point,
        color: Some("#0000ff".to_string()),
        svg: None,
        line_weight: None,
        dash_pattern: None,
        draw_layer: "water".to_string(),
        form_schema: None,
        is_active: true,
    }
}

/// Poll `condition` until it holds or the deadline passes.
async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

// ============================================================================
// Client round trips
// ============================================================================

#[tokio::test]
async fn test_round_trip_assigns_server_ids() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(true));

    let feature = unsynced_feature(1);
    store.save_feature(feature.clone()).await.unwrap();
    assert_eq!(store.unsynced_features(1).await.unwrap().len(), 1);

    http.push_response(Ok(json_response(serde_json::json!({
        "success": true,
        "features": [{
            "client_id": feature.client_id.as_str(),
            "id": 42,
            "feature_type_id": 3,
            "points": [{
                "client_id": feature.points[0].client_id.as_str(),
                "id": 101,
                "feature_id": 42,
                "coords": [-111.89, 40.76]
            }]
        }],
        "server_time": "2024-06-01T12:00:00Z"
    }))))
    .await;

    let client = new_client(store.clone(), http.clone(), network);
    let result = client.sync_project(1).await;

    assert!(result.success);
    assert_eq!(result.synced, 1);
    assert_eq!(result.pulled, 1);
    assert_eq!(result.merged, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(result.remaining_unsynced, 0);
    assert!(result.server_timestamp.is_some());

    assert!(store.unsynced_features(1).await.unwrap().is_empty());
    let stored = store.features_for_project(1).await.unwrap();
    assert_eq!(stored[0].id, Some(42));
    assert_eq!(stored[0].points[0].id, Some(101));
    assert!(store.last_sync(1).await.unwrap().is_some());
    assert_eq!(store.unsynced_count(1).await.unwrap(), 0);

    // The push payload carried the nested feature keyed by client_id
    let body = http.last_request_body().await;
    assert_eq!(body["features"][0]["client_id"], feature.client_id.as_str());
    assert!(body["features"][0].get("id").is_none());
    assert_eq!(body["features"][0]["points"][0]["coords"][0], -111.89);
    assert!(body["last_sync_timestamp"].is_null());
}

#[tokio::test]
async fn test_offline_precondition_mutates_nothing() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(false));

    store.save_feature(unsynced_feature(1)).await.unwrap();

    let client = new_client(store.clone(), http.clone(), network);
    let result = client.sync_project(1).await;

    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("offline"));
    assert_eq!(http.request_count().await, 0);
    assert_eq!(store.unsynced_features(1).await.unwrap().len(), 1);
    assert!(store.last_sync(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_transport_failure_preserves_unsynced_set() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(true));

    store.save_feature(unsynced_feature(1)).await.unwrap();
    http.push_response(Err(BridgeError::OperationFailed(
        "connection reset".to_string(),
    )))
    .await;

    let client = new_client(store.clone(), http.clone(), network);
    let result = client.sync_project(1).await;

    assert!(!result.success);
    assert_eq!(result.failed, 1);
    assert_eq!(result.remaining_unsynced, 1);
    assert_eq!(store.unsynced_features(1).await.unwrap().len(), 1);
    assert!(store.last_sync(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_http_error_status_is_transport_failure() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(true));

    store.save_feature(unsynced_feature(1)).await.unwrap();
    http.push_response(Ok(HttpResponse {
        status: 503,
        headers: HashMap::new(),
        body: Bytes::new(),
    }))
    .await;

    let client = new_client(store.clone(), http.clone(), network);
    let result = client.sync_project(1).await;

    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("503"));
    assert_eq!(store.unsynced_features(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_server_rejection_is_a_no_op() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(true));

    store.save_feature(unsynced_feature(1)).await.unwrap();
    http.push_response(Ok(json_response(serde_json::json!({
        "success": false,
        "error": "project archived"
    }))))
    .await;

    let client = new_client(store.clone(), http.clone(), network);
    let result = client.sync_project(1).await;

    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("project archived"));
    assert_eq!(store.unsynced_features(1).await.unwrap().len(), 1);
    assert!(store.last_sync(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_feature_type_is_skipped() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(true));

    let feature = unsynced_feature(1);
    store.save_feature(feature.clone()).await.unwrap();
    store.save_feature_types(1, &[catalog_entry(3)]).await.unwrap();

    http.push_response(Ok(json_response(serde_json::json!({
        "success": true,
        "features": [
            {
                "client_id": feature.client_id.as_str(),
                "id": 42,
                "feature_type_id": 3,
                "points": [{
                    "client_id": feature.points[0].client_id.as_str(),
                    "id": 101,
                    "feature_id": 42,
                    "coords": [-111.89, 40.76]
                }]
            },
            {
                // Type 99 is not in the cached catalog
                "client_id": "srv-orphan",
                "id": 43,
                "feature_type_id": 99,
                "points": []
            }
        ],
        "server_time": "2024-06-01T12:00:00Z"
    }))))
    .await;

    let client = new_client(store.clone(), http, network);
    let result = client.sync_project(1).await;

    assert!(result.success);
    assert_eq!(result.pulled, 2);
    assert_eq!(result.merged, 1);
    assert_eq!(result.failed, 1);

    let stored = store.features_for_project(1).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, Some(42));
}

#[tokio::test]
async fn test_pull_creates_features_collected_elsewhere() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(true));

    // Nothing local, but the project is known
    store.register_active_project(1).await.unwrap();
    http.push_response(Ok(json_response(serde_json::json!({
        "success": true,
        "features": [{
            "client_id": "other-device",
            "id": 7,
            "feature_type_id": 3,
            "name": "hydrant",
            "points": [{
                "client_id": "other-device-p1",
                "id": 70,
                "feature_id": 7,
                "coords": [-111.5, 40.5]
            }]
        }],
        "server_time": "2024-06-01T12:00:00Z"
    }))))
    .await;

    let client = new_client(store.clone(), http, network);
    let result = client.sync_project(1).await;

    assert!(result.success);
    assert_eq!(result.merged, 1);
    let stored = store.features_for_project(1).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name.as_deref(), Some("hydrant"));
    assert!(!stored[0].is_unsynced());
}

#[tokio::test]
async fn test_refresh_feature_types_caches_catalog() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(true));

    http.push_response(Ok(json_response(serde_json::json!({
        "success": true,
        "feature_types": [serde_json::to_value(catalog_entry(3)).unwrap()]
    }))))
    .await;

    let client = new_client(store.clone(), http, network);
    let types = client.refresh_feature_types(1).await.unwrap();

    assert_eq!(types.len(), 1);
    assert_eq!(types[0].id, 3);
    let cached = store.feature_types(1).await.unwrap();
    assert_eq!(cached, types);
}

#[tokio::test]
async fn test_refresh_feature_types_fails_offline() {
    let store = new_store();
    let http = Arc::new(MockHttpClient::new());
    let network = Arc::new(MockNetworkMonitor::new(false));

    let client = new_client(store.clone(), http.clone(), network);
    assert!(client.refresh_feature_types(1).await.is_err());
    assert_eq!(http.request_count().await, 0);
    assert!(store.feature_types(1).await.unwrap().is_empty());
}

// ============================================================================
// Manager behavior
// ============================================================================

struct Fixture {
    store: Arc<dyn FeatureStore>,
    http: Arc<MockHttpClient>,
    network: Arc<MockNetworkMonitor>,
    lifecycle: Arc<MockLifecycleObserver>,
    manager: Arc<SyncManager>,
}

fn fixture_with(http: Arc<MockHttpClient>, sync_interval: Duration) -> Fixture {
    let store = new_store();
    let network = Arc::new(MockNetworkMonitor::new(true));
    let lifecycle = Arc::new(MockLifecycleObserver::new(LifecycleState::Foreground));
    let client = Arc::new(new_client(store.clone(), http.clone(), network.clone()));
    let manager = Arc::new(SyncManager::new(
        store.clone(),
        client,
        network.clone(),
        lifecycle.clone(),
        SyncManagerConfig { sync_interval },
    ));
    Fixture {
        store,
        http,
        network,
        lifecycle,
        manager,
    }
}

fn fixture_with_http(http: Arc<MockHttpClient>) -> Fixture {
    // Interval long enough to never tick inside a test
    fixture_with(http, Duration::from_secs(3600))
}

fn fixture() -> Fixture {
    fixture_with_http(Arc::new(MockHttpClient::new()))
}

#[tokio::test]
async fn test_concurrent_triggers_run_exactly_one_pass() {
    let fx = fixture_with_http(Arc::new(MockHttpClient::with_delay(Duration::from_millis(
        200,
    ))));
    fx.store.save_feature(unsynced_feature(1)).await.unwrap();

    let first = {
        let manager = fx.manager.clone();
        tokio::spawn(async move { manager.sync_now().await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = fx.manager.sync_now().await.unwrap();

    let first = first.await.unwrap();
    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(fx.http.request_count().await, 1);
}

#[tokio::test]
async fn test_sync_now_bypasses_unsynced_gate() {
    let fx = fixture();
    // Project known, nothing pending
    fx.store.register_active_project(1).await.unwrap();
    assert!(!fx.manager.has_unsynced_changes().await.unwrap());

    let combined = fx.manager.sync_now().await.unwrap().unwrap();
    assert_eq!(combined.succeeded, 1);
    assert_eq!(fx.http.request_count().await, 1);
}

#[tokio::test]
async fn test_pass_continues_after_project_failure() {
    let fx = fixture();
    fx.store.save_feature(unsynced_feature(1)).await.unwrap();
    fx.store.save_feature(unsynced_feature(2)).await.unwrap();

    // First project fails on transport, second succeeds on the default reply
    fx.http
        .push_response(Err(BridgeError::OperationFailed("timeout".to_string())))
        .await;

    let combined = fx.manager.sync_now().await.unwrap().unwrap();
    assert_eq!(combined.results.len(), 2);
    assert_eq!(combined.failed, 1);
    assert_eq!(combined.succeeded, 1);
    assert_eq!(fx.http.request_count().await, 2);
}

#[tokio::test]
async fn test_reconnect_triggers_sync() {
    let fx = fixture();
    fx.store.save_feature(unsynced_feature(1)).await.unwrap();

    fx.network.emit(NetworkStatus::Disconnected).await;
    fx.manager.start().await.unwrap();

    fx.network.emit(NetworkStatus::Connected).await;
    let http = fx.http.clone();
    wait_until(|| {
        let http = http.clone();
        async move { http.request_count().await >= 1 }
    })
    .await;

    fx.manager.stop().await;
}

#[tokio::test]
async fn test_foreground_transition_triggers_sync() {
    let fx = fixture();
    fx.store.save_feature(unsynced_feature(1)).await.unwrap();

    fx.lifecycle.emit(LifecycleState::Background).await;
    fx.manager.start().await.unwrap();

    fx.lifecycle.emit(LifecycleState::Foreground).await;
    let http = fx.http.clone();
    wait_until(|| {
        let http = http.clone();
        async move { http.request_count().await >= 1 }
    })
    .await;

    fx.manager.stop().await;
}

#[tokio::test]
async fn test_interval_tick_triggers_sync() {
    let fx = fixture_with(Arc::new(MockHttpClient::new()), Duration::from_millis(25));
    fx.store.save_feature(unsynced_feature(1)).await.unwrap();

    fx.manager.start().await.unwrap();

    let http = fx.http.clone();
    wait_until(|| {
        let http = http.clone();
        async move { http.request_count().await >= 1 }
    })
    .await;

    fx.manager.stop().await;
}

#[tokio::test]
async fn test_interval_tick_skips_when_nothing_unsynced() {
    let fx = fixture_with(Arc::new(MockHttpClient::new()), Duration::from_millis(25));
    fx.store.register_active_project(1).await.unwrap();

    fx.manager.start().await.unwrap();

    // Several ticks pass with nothing pending
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fx.http.request_count().await, 0);

    fx.manager.stop().await;
}

#[tokio::test]
async fn test_triggers_skip_when_nothing_unsynced() {
    let fx = fixture();
    fx.store.register_active_project(1).await.unwrap();

    fx.lifecycle.emit(LifecycleState::Background).await;
    fx.manager.start().await.unwrap();

    fx.lifecycle.emit(LifecycleState::Foreground).await;
    fx.network.emit(NetworkStatus::Disconnected).await;
    fx.network.emit(NetworkStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(fx.http.request_count().await, 0);
    fx.manager.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_trigger_listeners() {
    let fx = fixture();
    fx.store.save_feature(unsynced_feature(1)).await.unwrap();

    fx.lifecycle.emit(LifecycleState::Background).await;
    fx.manager.start().await.unwrap();
    fx.manager.stop().await;

    fx.lifecycle.emit(LifecycleState::Foreground).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fx.http.request_count().await, 0);
}
