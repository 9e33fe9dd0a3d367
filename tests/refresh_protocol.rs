//! Coordinator-level tests for the 401/403 refresh-and-retry protocol.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homewidget_client::{
    ApiClient, ApiClientConfig, ConfigureOptions, MemoryTokenStore, RequestOptions, SessionHooks,
    TokenStore, UnauthorizedReason,
};

/// Recording hooks standing in for the session layer.
#[derive(Default)]
struct TestHooks {
    access: Mutex<Option<String>>,
    reasons: Mutex<Vec<UnauthorizedReason>>,
    refreshed: Mutex<Vec<(String, String)>>,
}

impl TestHooks {
    fn reasons(&self) -> Vec<UnauthorizedReason> {
        self.reasons.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionHooks for TestHooks {
    fn access_token(&self) -> Option<String> {
        self.access.lock().unwrap().clone()
    }

    async fn on_token_refreshed(&self, access: &str, refresh: &str) {
        *self.access.lock().unwrap() = Some(access.to_string());
        self.refreshed
            .lock()
            .unwrap()
            .push((access.to_string(), refresh.to_string()));
    }

    async fn on_unauthorized(&self, reason: UnauthorizedReason) {
        self.reasons.lock().unwrap().push(reason);
    }
}

fn setup(uri: &str, access: Option<&str>) -> (Arc<ApiClient>, Arc<MemoryTokenStore>, Arc<TestHooks>) {
    let store = Arc::new(MemoryTokenStore::new());
    let client = ApiClient::new(ApiClientConfig::new(uri), store.clone());
    let hooks = Arc::new(TestHooks::default());
    *hooks.access.lock().unwrap() = access.map(str::to_string);
    client.configure(ConfigureOptions {
        hooks: Some(hooks.clone()),
        ..Default::default()
    });
    (client, store, hooks)
}

fn token_pair(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 900,
        "role": "common",
    })
}

#[tokio::test]
async fn attaches_bearer_token_from_hooks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .and(header("Authorization", "Bearer live-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _store, hooks) = setup(&server.uri(), Some("live-token"));
    let body: serde_json::Value = client.get("/api/widgets").await.unwrap();
    assert_eq!(body["items"], json!([]));
    assert!(hooks.reasons().is_empty());
}

#[tokio::test]
async fn caller_headers_cannot_shadow_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .and(header("Authorization", "Bearer real"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _store, _hooks) = setup(&server.uri(), Some("real"));
    let opts = RequestOptions::new().header(AUTHORIZATION, HeaderValue::from_static("Bearer forged"));
    let res = client.request(Method::GET, "/api/widgets", opts).await.unwrap();
    assert_eq!(res.status(), 200);

    // The forged value must be replaced, not merely outranked: the server
    // sees exactly one Authorization value and it is the real token
    let requests = server.received_requests().await.unwrap();
    let auth_values: Vec<String> = requests[0]
        .headers
        .get_all("authorization")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(auth_values, vec!["Bearer real".to_string()]);
}

#[tokio::test]
async fn concurrent_401s_trigger_exactly_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/feed"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/feed"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;
    // The delay keeps the refresh in flight while every caller discovers its 401
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({ "refresh_token": "r1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(150))
                .set_body_json(token_pair("fresh", "r2")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, store, hooks) = setup(&server.uri(), Some("stale"));
    store.set("r1".to_string()).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..6 {
        let client = client.clone();
        tasks.spawn(async move { client.get::<serde_json::Value>("/api/feed").await.unwrap() });
    }
    while let Some(res) = tasks.join_next().await {
        assert_eq!(res.unwrap()["ok"], json!(true));
    }

    // Rotation happened exactly once and nothing was reported as a failure
    assert_eq!(store.get().await.as_deref(), Some("r2"));
    assert_eq!(hooks.refreshed.lock().unwrap().len(), 1);
    assert!(hooks.reasons().is_empty());
}

#[tokio::test]
async fn rejected_retry_fails_without_second_refresh() {
    let server = MockServer::start().await;
    // The resource rejects every token, including the freshly issued one
    Mock::given(method("GET"))
        .and(path("/api/secure"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_pair("fresh", "r2")))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store, hooks) = setup(&server.uri(), Some("stale"));
    store.set("r1".to_string()).await;

    let res = client
        .request(Method::GET, "/api/secure", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(hooks.reasons(), vec![UnauthorizedReason::Unauthorized]);
    assert!(store.get().await.is_none());
}

#[tokio::test]
async fn successful_refresh_rotates_stored_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/feed"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/feed"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({ "refresh_token": "old-refresh" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_pair("fresh", "new-refresh")))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store, hooks) = setup(&server.uri(), Some("stale"));
    store.set("old-refresh".to_string()).await;

    let _: serde_json::Value = client.get("/api/feed").await.unwrap();
    assert_eq!(store.get().await.as_deref(), Some("new-refresh"));
    assert_eq!(
        hooks.refreshed.lock().unwrap().as_slice(),
        &[("fresh".to_string(), "new-refresh".to_string())]
    );
}

#[tokio::test]
async fn rate_limited_refresh_keeps_stored_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/feed"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "detail": "Too many refresh attempts" })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store, hooks) = setup(&server.uri(), Some("stale"));
    store.set("r1".to_string()).await;

    // The original 401 comes back unmodified
    let res = client
        .request(Method::GET, "/api/feed", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(hooks.reasons(), vec![UnauthorizedReason::RefreshRateLimited]);
    assert_eq!(store.get().await.as_deref(), Some("r1"));
}

#[tokio::test]
async fn failed_refresh_clears_stored_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/feed"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid token" })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store, hooks) = setup(&server.uri(), Some("stale"));
    store.set("revoked".to_string()).await;

    let res = client
        .request(Method::GET, "/api/feed", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(hooks.reasons(), vec![UnauthorizedReason::RefreshFailed]);
    assert!(store.get().await.is_none());
}

#[tokio::test]
async fn missing_refresh_token_fails_without_network_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/feed"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_pair("a", "r")))
        .expect(0)
        .mount(&server)
        .await;

    let (client, _store, hooks) = setup(&server.uri(), Some("stale"));

    let res = client
        .request(Method::GET, "/api/feed", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(hooks.reasons(), vec![UnauthorizedReason::NoToken]);
}

#[tokio::test]
async fn forbidden_reports_without_touching_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/admin/widgets"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "detail": "Forbidden" })))
        .mount(&server)
        .await;

    let (client, store, hooks) = setup(&server.uri(), Some("live-token"));
    store.set("r1".to_string()).await;

    let res = client
        .request(Method::GET, "/api/admin/widgets", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(res.status(), 403);
    assert_eq!(hooks.reasons(), vec![UnauthorizedReason::Forbidden]);
    assert_eq!(store.get().await.as_deref(), Some("r1"));
}

#[tokio::test]
async fn json_surfaces_detail_message_for_terminal_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets/99"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "detail": "Widget not found" })))
        .mount(&server)
        .await;

    let (client, _store, _hooks) = setup(&server.uri(), Some("live-token"));
    let err = client.get::<serde_json::Value>("/api/widgets/99").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "Widget not found");
}

#[tokio::test]
async fn post_sends_json_body_and_decodes_created_resource() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/notes"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({ "text": "hi" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 1, "text": "hi" })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _store, _hooks) = setup(&server.uri(), Some("live-token"));
    let created: serde_json::Value = client.post("/api/notes", &json!({ "text": "hi" })).await.unwrap();
    assert_eq!(created["id"], json!(1));
}

#[tokio::test]
async fn empty_success_body_decodes_as_unit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _store, _hooks) = setup(&server.uri(), Some("live-token"));
    client.logout().await.unwrap();
}
