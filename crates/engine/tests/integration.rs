//! Integration tests for the release notification engine.
//!
//! Orchestrator cycles run against an in-memory store, a scripted release source
//! and a recording transport. The HTTP release client runs against an in-process
//! axum server standing in for the release API.
//!
//! ```bash
//! cargo test -p herald-engine --test integration
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::Mutex;

use herald_common::error::{AppError, DeliveryError};
use herald_common::storage::{JsonStore, MemoryStore, VERSION_MARKER_KEY};
use herald_common::types::{ChangeType, NotificationPayload, ReleaseRecord};
use herald_engine::orchestrator::{
    CheckOutcome, DeliveryTransport, NotificationOrchestrator, OrchestratorConfig,
};
use herald_engine::preferences::{PreferenceStore, PreferenceStoreConfig};
use herald_engine::releases::{
    ReleaseSource, ReleaseSourceClient, ReleaseSourceConfig, select_between,
};
use herald_engine::version::{VersionSource, VersionTracker};

// ============================================================
// Shared helpers
// ============================================================

fn release(tag: &str, body: &str) -> ReleaseRecord {
    ReleaseRecord {
        tag: tag.to_string(),
        name: tag.to_string(),
        body: body.to_string(),
        published_at: None,
        html_url: format!("https://example.test/releases/{}", tag),
        draft: false,
        prerelease: false,
    }
}

/// Newest-first feed served from memory.
#[derive(Default)]
struct ScriptedReleases {
    feed: Vec<ReleaseRecord>,
    fail: AtomicBool,
}

impl ScriptedReleases {
    fn new(feed: Vec<ReleaseRecord>) -> Self {
        Self {
            feed,
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ReleaseSource for ScriptedReleases {
    async fn get_release_by_tag(&self, version: &str) -> Result<Option<ReleaseRecord>, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Transient("release API unavailable".to_string()));
        }
        let wanted = version.trim_start_matches('v');
        Ok(self
            .feed
            .iter()
            .find(|r| r.tag.trim_start_matches('v') == wanted)
            .cloned())
    }

    async fn get_releases_between(
        &self,
        from_version: &str,
        to_version: &str,
    ) -> Result<Vec<ReleaseRecord>, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Transient("release API unavailable".to_string()));
        }
        match select_between(&self.feed, from_version, to_version) {
            Some(selected) => Ok(selected),
            None => Ok(self.get_release_by_tag(to_version).await?.into_iter().collect()),
        }
    }

    async fn clear_cache(&self) {}
}

/// Records deliveries; recipients listed in `failures` fail with that error.
#[derive(Default)]
struct RecordingTransport {
    failures: HashMap<String, DeliveryError>,
    delivered: Mutex<Vec<(String, NotificationPayload)>>,
}

impl RecordingTransport {
    fn failing(failures: &[(&str, DeliveryError)]) -> Self {
        Self {
            failures: failures
                .iter()
                .map(|(id, e)| (id.to_string(), e.clone()))
                .collect(),
            delivered: Mutex::new(Vec::new()),
        }
    }

    async fn delivered_to(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .delivered
            .lock()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn deliver(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        if let Some(err) = self.failures.get(recipient_id) {
            return Err(err.clone());
        }
        self.delivered
            .lock()
            .await
            .push((recipient_id.to_string(), payload.clone()));
        Ok(())
    }
}

struct Harness {
    orchestrator: NotificationOrchestrator,
    store: Arc<MemoryStore>,
    releases: Arc<ScriptedReleases>,
}

fn harness_with_store(current: &str, feed: Vec<ReleaseRecord>, store: Arc<MemoryStore>) -> Harness {
    let releases = Arc::new(ScriptedReleases::new(feed));
    let tracker = VersionTracker::new(VersionSource::Fixed(current.to_string()), store.clone());
    let preferences = PreferenceStore::new(store.clone(), PreferenceStoreConfig::default());
    let orchestrator = NotificationOrchestrator::new(
        tracker,
        releases.clone(),
        preferences,
        OrchestratorConfig::default(),
    );
    Harness {
        orchestrator,
        store,
        releases,
    }
}

fn harness(current: &str, feed: Vec<ReleaseRecord>) -> Harness {
    harness_with_store(current, feed, Arc::new(MemoryStore::new()))
}

async fn saved_marker(store: &MemoryStore) -> Option<String> {
    store
        .read(VERSION_MARKER_KEY)
        .await
        .unwrap()
        .and_then(|doc| doc["version"].as_str().map(str::to_string))
}

// ============================================================
// Orchestrator cycles
// ============================================================

#[tokio::test]
async fn test_fresh_deployment_notifies_once() {
    let h = harness("1.0.0", vec![release("v1.0.0", "## Features\n- First release")]);
    let transport = Arc::new(RecordingTransport::default());
    h.orchestrator.initialize(transport.clone()).await.unwrap();
    h.orchestrator.preferences().register_user("alice").await;

    let outcome = h.orchestrator.check_and_notify().await.unwrap();
    let CheckOutcome::Notified(report) = &outcome else {
        panic!("expected a notification, got {:?}", outcome);
    };
    assert_eq!(report.version, "1.0.0");
    assert_eq!(report.change_type, ChangeType::Major);
    assert_eq!(report.users_notified, 1);
    assert_eq!(report.users_failed, 0);
    assert_eq!(transport.delivered_to().await, vec!["alice"]);
    assert_eq!(saved_marker(&h.store).await.as_deref(), Some("1.0.0"));

    let pref = h.orchestrator.preferences().get_user_preferences("alice").await;
    assert_eq!(pref.last_notified.as_deref(), Some("1.0.0"));

    let again = h.orchestrator.check_and_notify().await.unwrap();
    assert_eq!(again, CheckOutcome::NoNewVersion);
    assert_eq!(again.reason(), Some("No new version"));
    assert_eq!(transport.delivered.lock().await.len(), 1);
}

#[tokio::test]
async fn test_unreachable_recipient_is_opted_out() {
    let h = harness("1.1.0", vec![release("v1.1.0", "## Fixes\n- Stuff"), release("v1.0.0", "")]);
    let transport = Arc::new(RecordingTransport::failing(&[(
        "a",
        DeliveryError::Unreachable("Cannot send messages to this user".to_string()),
    )]));
    h.orchestrator.initialize(transport.clone()).await.unwrap();

    let prefs = h.orchestrator.preferences();
    prefs.register_user("a").await;
    prefs.register_user("b").await;
    // Both users were notified about 1.0.0 already.
    prefs.record_notification("a", "1.0.0").await;
    prefs.record_notification("b", "1.0.0").await;
    h.orchestrator.tracker().save_notified_version("1.0.0").await.unwrap();

    let outcome = h.orchestrator.check_and_notify().await.unwrap();
    let CheckOutcome::Notified(report) = &outcome else {
        panic!("expected a notification, got {:?}", outcome);
    };
    assert_eq!(report.change_type, ChangeType::Minor);
    assert_eq!(report.users_notified, 1);
    assert_eq!(report.users_failed, 1);
    assert_eq!(report.users_opted_out, 1);

    let prefs = h.orchestrator.preferences();
    let opted_out = prefs.get_user_preferences("a").await;
    assert!(opted_out.opted_out);
    assert!(opted_out.last_interaction.is_none());
    assert_eq!(
        prefs.get_user_preferences("b").await.last_notified.as_deref(),
        Some("1.1.0")
    );
    for change_type in [ChangeType::Patch, ChangeType::Minor, ChangeType::Major] {
        assert!(!prefs
            .get_users_to_notify(change_type)
            .await
            .contains(&"a".to_string()));
    }
    assert_eq!(saved_marker(&h.store).await.as_deref(), Some("1.1.0"));
}

#[tokio::test]
async fn test_transient_failure_keeps_preferences() {
    let h = harness("1.0.1", vec![release("v1.0.1", "- fix"), release("v1.0.0", "")]);
    let transport = Arc::new(RecordingTransport::failing(&[(
        "a",
        DeliveryError::Transient("503 from gateway".to_string()),
    )]));
    h.orchestrator.initialize(transport.clone()).await.unwrap();

    let prefs = h.orchestrator.preferences();
    prefs.set_notification_level("a", "patch").await.unwrap();
    prefs.set_notification_level("b", "patch").await.unwrap();
    prefs.record_notification("a", "1.0.0").await;
    h.orchestrator.tracker().save_notified_version("1.0.0").await.unwrap();

    let outcome = h.orchestrator.check_and_notify().await.unwrap();
    let CheckOutcome::Notified(report) = &outcome else {
        panic!("expected a notification, got {:?}", outcome);
    };
    assert_eq!(report.users_notified, 1);
    assert_eq!(report.users_failed, 1);
    assert_eq!(report.users_opted_out, 0);

    let a = h.orchestrator.preferences().get_user_preferences("a").await;
    assert!(!a.opted_out);
    assert_eq!(a.last_notified.as_deref(), Some("1.0.0"));
    // The marker still moves forward despite the failure.
    assert_eq!(saved_marker(&h.store).await.as_deref(), Some("1.0.1"));
}

#[tokio::test]
async fn test_check_before_initialize_fails() {
    let h = harness("1.0.0", vec![release("v1.0.0", "")]);
    assert!(matches!(
        h.orchestrator.check_and_notify().await,
        Err(AppError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_unreadable_version_blocks_initialize() {
    let h = harness("   ", vec![]);
    let transport = Arc::new(RecordingTransport::default());
    assert!(matches!(
        h.orchestrator.initialize(transport).await,
        Err(AppError::Config(_))
    ));
    assert!(!h.orchestrator.is_initialized().await);
    assert!(matches!(
        h.orchestrator.check_and_notify().await,
        Err(AppError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_no_recipients_still_marks_version_processed() {
    let h = harness("1.0.1", vec![release("v1.0.1", ""), release("v1.0.0", "")]);
    let transport = Arc::new(RecordingTransport::default());
    h.orchestrator.initialize(transport.clone()).await.unwrap();

    let prefs = h.orchestrator.preferences();
    prefs.register_user("minor-user").await;
    prefs.record_notification("minor-user", "1.0.0").await;
    h.orchestrator.tracker().save_notified_version("1.0.0").await.unwrap();

    let outcome = h.orchestrator.check_and_notify().await.unwrap();
    assert_eq!(
        outcome,
        CheckOutcome::NoRecipients {
            version: "1.0.1".to_string(),
            change_type: ChangeType::Patch,
        }
    );
    assert_eq!(outcome.reason(), Some("No users opted in for this change type"));
    assert!(transport.delivered.lock().await.is_empty());
    assert_eq!(saved_marker(&h.store).await.as_deref(), Some("1.0.1"));
}

#[tokio::test]
async fn test_no_releases_persists_nothing() {
    let h = harness("2.0.0", vec![release("v1.0.0", "")]);
    let transport = Arc::new(RecordingTransport::default());
    h.orchestrator.initialize(transport.clone()).await.unwrap();
    h.orchestrator.preferences().register_user("alice").await;

    let outcome = h.orchestrator.check_and_notify().await.unwrap();
    assert_eq!(
        outcome,
        CheckOutcome::NoReleasesFound {
            version: "2.0.0".to_string()
        }
    );
    assert_eq!(saved_marker(&h.store).await, None);
}

#[tokio::test]
async fn test_release_source_error_aborts_cycle() {
    let h = harness("1.0.0", vec![release("v1.0.0", "")]);
    let transport = Arc::new(RecordingTransport::default());
    h.orchestrator.initialize(transport.clone()).await.unwrap();
    h.orchestrator.preferences().register_user("alice").await;

    h.releases.fail.store(true, Ordering::SeqCst);
    let err = h.orchestrator.check_and_notify().await.unwrap_err();
    assert!(err.is_transient());
    assert!(transport.delivered.lock().await.is_empty());
    assert_eq!(saved_marker(&h.store).await, None);

    // The next trigger retries cleanly.
    h.releases.fail.store(false, Ordering::SeqCst);
    assert!(h.orchestrator.check_and_notify().await.unwrap().notified());
}

#[tokio::test]
async fn test_first_run_caps_release_history() {
    let feed: Vec<ReleaseRecord> = (1..=8)
        .rev()
        .map(|minor| release(&format!("v1.{}.0", minor), &format!("## Features\n- feature {}", minor)))
        .collect();
    let h = harness("1.8.0", feed);
    let transport = Arc::new(RecordingTransport::default());
    h.orchestrator.initialize(transport.clone()).await.unwrap();
    h.orchestrator.preferences().register_user("alice").await;

    let outcome = h.orchestrator.check_and_notify().await.unwrap();
    let CheckOutcome::Notified(report) = &outcome else {
        panic!("expected a notification, got {:?}", outcome);
    };
    assert_eq!(report.releases, 5);
    assert_eq!(report.change_type, ChangeType::Minor);

    let delivered = transport.delivered.lock().await;
    let payload = &delivered[0].1;
    assert_eq!(payload.title, "🚀 5 new releases");
    assert!(payload.fields.iter().all(|f| f.name != "Version"));
    let features = payload
        .fields
        .iter()
        .find(|f| f.name.contains("Features"))
        .unwrap();
    assert!(features.value.starts_with("• [v1.8.0] feature 8"));
    assert!(!features.value.contains("feature 3"));
    assert!(payload.footer.contains("on by default"));
}

#[tokio::test]
async fn test_level_gates_recipients() {
    let h = harness("1.1.0", vec![release("v1.1.0", ""), release("v1.0.0", "")]);
    let transport = Arc::new(RecordingTransport::default());
    h.orchestrator.initialize(transport.clone()).await.unwrap();

    let prefs = h.orchestrator.preferences();
    prefs.set_notification_level("major-only", "major").await.unwrap();
    prefs.set_notification_level("everything", "patch").await.unwrap();
    prefs.set_notification_level("silent", "none").await.unwrap();
    prefs.record_notification("everything", "1.0.0").await;
    h.orchestrator.tracker().save_notified_version("1.0.0").await.unwrap();
    h.orchestrator.check_and_notify().await.unwrap();

    assert_eq!(transport.delivered_to().await, vec!["everything"]);
    let delivered = transport.delivered.lock().await;
    let version = delivered[0].1.fields.iter().find(|f| f.name == "Version").unwrap();
    assert_eq!(version.value, "1.0.0 → 1.1.0");
    assert!(delivered[0].1.footer.starts_with("Thanks for reading since v1.0.0!"));
}

#[tokio::test]
async fn test_dangling_marker_is_cleared_on_initialize() {
    let store = Arc::new(MemoryStore::new());
    let h = harness_with_store("1.0.0", vec![release("v1.0.0", "")], store.clone());
    h.orchestrator.tracker().save_notified_version("1.0.0").await.unwrap();

    let transport = Arc::new(RecordingTransport::default());
    h.orchestrator.initialize(transport.clone()).await.unwrap();
    assert_eq!(saved_marker(&store).await, None);

    // With the marker gone, a newly registered user gets the first-run notice.
    h.orchestrator.preferences().register_user("alice").await;
    assert!(h.orchestrator.check_and_notify().await.unwrap().notified());
    assert_eq!(transport.delivered_to().await, vec!["alice"]);
}

#[tokio::test]
async fn test_shutdown_flushes_preferences() {
    let h = harness("1.0.0", vec![release("v1.0.0", "")]);
    h.orchestrator.preferences().register_user("alice").await;
    let writes_before = h.store.write_count();

    h.orchestrator.shutdown().await.unwrap();
    assert_eq!(h.store.write_count(), writes_before + 1);
    assert!(!h.orchestrator.preferences().has_pending_write().await);
}

// ============================================================
// HTTP release client
// ============================================================

#[derive(Clone, Default)]
struct FixtureState {
    tag_hits: Arc<AtomicUsize>,
    list_hits: Arc<AtomicUsize>,
}

fn api_release(tag: &str, draft: bool, prerelease: bool) -> serde_json::Value {
    serde_json::json!({
        "tag_name": tag,
        "name": format!("Release {}", tag),
        "body": "## Features\n- something",
        "published_at": "2025-06-01T10:00:00Z",
        "html_url": format!("https://github.com/acme/bot/releases/tag/{}", tag),
        "draft": draft,
        "prerelease": prerelease
    })
}

async fn list_releases(State(state): State<FixtureState>) -> Json<serde_json::Value> {
    state.list_hits.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!([
        api_release("v1.3.0", true, false),
        api_release("v1.2.0", false, false),
        api_release("v1.2.0-rc.1", false, true),
        api_release("v1.1.0", false, false),
        api_release("v1.0.0", false, false),
        api_release("v0.9.0", false, false),
    ]))
}

async fn release_by_tag(State(state): State<FixtureState>, Path(tag): Path<String>) -> Response {
    state.tag_hits.fetch_add(1, Ordering::SeqCst);
    match tag.as_str() {
        "v1.2.0" | "v0.1.0" => Json(api_release(&tag, false, false)).into_response(),
        "v9.9.9" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        _ => (StatusCode::NOT_FOUND, Json(serde_json::json!({"message": "Not Found"}))).into_response(),
    }
}

async fn spawn_release_api() -> (String, FixtureState) {
    let state = FixtureState::default();
    let app = Router::new()
        .route("/repos/acme/bot/releases", get(list_releases))
        .route("/repos/acme/bot/releases/tags/{tag}", get(release_by_tag))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn client(api_url: String) -> ReleaseSourceClient {
    ReleaseSourceClient::new(ReleaseSourceConfig {
        api_url,
        repo: "acme/bot".to_string(),
        token: Some("test-token".to_string()),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_client_release_by_tag_is_cached() {
    let (url, state) = spawn_release_api().await;
    let client = client(url);

    let first = client.get_release_by_tag("1.2.0").await.unwrap().unwrap();
    assert_eq!(first.tag, "v1.2.0");
    assert_eq!(first.name, "Release v1.2.0");

    let second = client.get_release_by_tag("v1.2.0").await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(state.tag_hits.load(Ordering::SeqCst), 1);

    client.clear_cache().await;
    client.get_release_by_tag("1.2.0").await.unwrap();
    assert_eq!(state.tag_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_missing_release_is_none() {
    let (url, _) = spawn_release_api().await;
    let client = client(url);
    assert!(client.get_release_by_tag("4.0.0").await.unwrap().is_none());
}

#[tokio::test]
async fn test_client_server_error_is_transient() {
    let (url, _) = spawn_release_api().await;
    let client = client(url);
    assert!(matches!(
        client.get_release_by_tag("9.9.9").await,
        Err(AppError::Transient(_))
    ));
}

#[tokio::test]
async fn test_client_releases_between() {
    let (url, state) = spawn_release_api().await;
    let client = client(url);

    let releases = client.get_releases_between("1.0.0", "1.2.0").await.unwrap();
    let tags: Vec<&str> = releases.iter().map(|r| r.tag.as_str()).collect();
    assert_eq!(tags, vec!["v1.2.0", "v1.1.0"]);
    assert_eq!(state.list_hits.load(Ordering::SeqCst), 1);
    assert_eq!(state.tag_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_client_releases_between_falls_back_to_direct_fetch() {
    let (url, state) = spawn_release_api().await;
    let client = client(url);

    let releases = client.get_releases_between("0.0.1", "0.1.0").await.unwrap();
    let tags: Vec<&str> = releases.iter().map(|r| r.tag.as_str()).collect();
    assert_eq!(tags, vec!["v0.1.0"]);
    assert_eq!(state.tag_hits.load(Ordering::SeqCst), 1);

    let none = client.get_releases_between("1.0.0", "5.0.0").await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_client_unreachable_api_is_transient() {
    // Nothing listens on this port once the listener is dropped.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client(format!("http://{}", addr));
    let err = client.get_releases_between("1.0.0", "1.1.0").await.unwrap_err();
    assert!(matches!(err, AppError::Transient(_)));
}
