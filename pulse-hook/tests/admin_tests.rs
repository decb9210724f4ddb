//! Integration tests for admin, subject, and health endpoints
//!
//! Tests cover:
//! - Webhook config read (masked secret) and update (persist, clear, apply)
//! - Secret fallback resolution from environment and TOML
//! - Clearing the aggregate store
//! - Subject list and detail reads
//! - Provider backfill: not configured, success, upstream failure
//! - Health and build info

use axum::{
    body::Body,
    extract::Path,
    http::{Request, StatusCode},
    routing::{get, post},
    Json, Router,
};
use pulse_common::config::{TomlConfig, WebhookConfig};
use pulse_common::provider::{ProviderClient, ProviderConfig};
use pulse_common::signature::compute_signature;
use pulse_common::AggregateStore;
use pulse_hook::settings::{load_settings, resolve_fallback, WEBHOOK_SECRET_ENV};
use pulse_hook::{build_router, AppState, SettingsFallback, WebhookSettings};
use serde_json::{json, Value};
use serial_test::serial;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method

struct TestApp {
    dir: TempDir,
    router: Router,
}

impl TestApp {
    fn settings_path(&self) -> PathBuf {
        self.dir.path().join("webhook-settings.json")
    }

    fn aggregate_path(&self) -> PathBuf {
        self.dir.path().join("aggregates.json")
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Should read body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn score(&self, external_id: &str, score_type: &str, value: f64) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri("/api/webhook")
            .header("X-Event-Type", "ScoreCreatedIntegrationEvent")
            .header("X-External-Id", external_id)
            .body(Body::from(json!({"type": score_type, "value": value}).to_string()))
            .unwrap();
        self.send(request).await.0
    }
}

async fn setup_with(
    fallback: SettingsFallback,
    provider: Option<ProviderClient>,
) -> TestApp {
    let dir = TempDir::new().unwrap();
    let store = AggregateStore::open(dir.path().join("aggregates.json"))
        .await
        .unwrap()
        .spawn(16);
    let state = AppState::new(store, dir.path().join("webhook-settings.json"))
        .with_fallback(fallback)
        .with_provider(provider);

    TestApp {
        router: build_router(state),
        dir,
    }
}

async fn setup() -> TestApp {
    setup_with(SettingsFallback::default(), None).await
}

// =============================================================================
// Webhook config
// =============================================================================

#[tokio::test]
async fn test_config_initially_unconfigured() {
    let app = setup().await;
    let (status, body) = app.get("/api/admin/config").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"webhookUrl": null, "secretConfigured": false, "secretHint": null})
    );
}

#[tokio::test]
async fn test_set_config_masks_secret_and_persists() {
    let app = setup().await;
    let (status, body) = app
        .post_json(
            "/api/admin/config",
            json!({"webhookUrl": "https://example.com/api/webhook", "secret": "supersecret"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, config) = app.get("/api/admin/config").await;
    assert_eq!(config["webhookUrl"], "https://example.com/api/webhook");
    assert_eq!(config["secretConfigured"], true);
    assert_eq!(config["secretHint"], "supe****");
    assert!(!config.to_string().contains("supersecret"));

    let saved = load_settings(&app.settings_path()).await;
    assert_eq!(saved.secret.as_deref(), Some("supersecret"));
}

#[tokio::test]
async fn test_new_secret_applies_to_next_delivery() {
    let app = setup().await;
    assert_eq!(app.score("abc", "sleep", 0.5).await, StatusCode::OK);

    app.post_json("/api/admin/config", json!({"secret": "rotated"}))
        .await;

    // Unsigned delivery now rejected
    assert_eq!(app.score("abc", "sleep", 0.6).await, StatusCode::UNAUTHORIZED);

    // Signed with the new secret accepted
    let body = json!({"type": "sleep", "value": 0.6}).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhook")
        .header("X-Event-Type", "ScoreCreatedIntegrationEvent")
        .header("X-External-Id", "abc")
        .header("X-Signature", compute_signature(body.as_bytes(), "rotated").unwrap())
        .body(Body::from(body))
        .unwrap();
    assert_eq!(app.send(request).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_empty_string_clears_field() {
    let app = setup().await;
    app.post_json(
        "/api/admin/config",
        json!({"webhookUrl": "https://example.com/hook", "secret": "abc12345"}),
    )
    .await;

    // Omitted webhookUrl stays; empty secret clears
    app.post_json("/api/admin/config", json!({"secret": ""})).await;

    let (_, config) = app.get("/api/admin/config").await;
    assert_eq!(config["webhookUrl"], "https://example.com/hook");
    assert_eq!(config["secretConfigured"], false);
    assert_eq!(app.score("abc", "sleep", 0.5).await, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_webhook_url_rejected() {
    let app = setup().await;
    let (status, body) = app
        .post_json("/api/admin/config", json!({"webhookUrl": "ftp://nope"}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(!app.settings_path().exists());
}

#[tokio::test]
async fn test_unparseable_config_body_is_json_400() {
    let app = setup().await;

    // Wrong field type
    let (status, body) = app
        .post_json("/api/admin/config", json!({"secret": 5}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // Malformed JSON
    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/config")
        .header("content-type", "application/json")
        .body(Body::from("{oops"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // Not JSON at all
    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/config")
        .header("content-type", "text/plain")
        .body(Body::from(r#"{"secret":"abc12345"}"#))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    assert!(!app.settings_path().exists());
    let (_, config) = app.get("/api/admin/config").await;
    assert_eq!(config["secretConfigured"], false);
}

#[tokio::test]
async fn test_fallback_secret_reported_and_enforced() {
    let app = setup_with(
        SettingsFallback {
            secret: Some("fromenv1".into()),
            webhook_url: Some("https://toml.example.com/webhook".into()),
        },
        None,
    )
    .await;

    let (_, config) = app.get("/api/admin/config").await;
    assert_eq!(config["secretConfigured"], true);
    assert_eq!(config["secretHint"], "from****");
    assert_eq!(config["webhookUrl"], "https://toml.example.com/webhook");

    assert_eq!(app.score("abc", "sleep", 0.5).await, StatusCode::UNAUTHORIZED);
}

#[test]
#[serial]
fn test_resolve_fallback_priority() {
    std::env::remove_var(WEBHOOK_SECRET_ENV);
    let toml = TomlConfig {
        webhook: WebhookConfig {
            secret: Some("from-toml".into()),
            url: None,
        },
        ..Default::default()
    };

    let fallback = resolve_fallback(&WebhookSettings::default(), &toml);
    assert_eq!(fallback.secret.as_deref(), Some("from-toml"));

    std::env::set_var(WEBHOOK_SECRET_ENV, "from-env");
    let fallback = resolve_fallback(&WebhookSettings::default(), &toml);
    assert_eq!(fallback.secret.as_deref(), Some("from-env"));

    // The settings file still wins at request time
    let settings = WebhookSettings {
        webhook_url: None,
        secret: Some("from-file".into()),
    };
    let fallback = resolve_fallback(&settings, &toml);
    assert_eq!(settings.effective_secret(&fallback), Some("from-file"));

    std::env::remove_var(WEBHOOK_SECRET_ENV);
}

// =============================================================================
// Store admin and reads
// =============================================================================

#[tokio::test]
async fn test_clear_empties_store() {
    let app = setup().await;
    app.score("abc", "sleep", 0.5).await;
    app.score("def", "sleep", 0.6).await;

    let (status, body) = app.post_empty("/api/admin/clear").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "removed": 2}));
    assert_eq!(std::fs::read_to_string(app.aggregate_path()).unwrap(), "{}");

    let (_, list) = app.get("/api/subjects").await;
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn test_subject_list_and_detail() {
    let app = setup().await;
    app.score("zeta", "sleep", 0.5).await;
    app.score("alpha", "activity", 0.25).await;

    let (status, list) = app.get("/api/subjects").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!({"count": 2, "subjects": ["alpha", "zeta"]}));

    let (status, record) = app.get("/api/subjects/alpha").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["scores"]["activity"]["value"], 0.25);

    let (status, body) = app.get("/api/subjects/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// =============================================================================
// Provider sync
// =============================================================================

async fn spawn_provider(fail_scores: bool) -> ProviderClient {
    let app = Router::new()
        .route(
            "/api/v1/oauth/account/token",
            post(|| async { Json(json!({"accountToken": "t", "expiresIn": 3600})) }),
        )
        .route(
            "/api/v1/account/profile/search",
            get(|| async { Json(json!({"items": [{"externalId": "abc"}, {"externalId": "def"}]})) }),
        )
        .route(
            "/api/v1/profile/score/:id",
            get(move |Path(id): Path<String>| async move {
                if fail_scores {
                    return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
                }
                (
                    StatusCode::OK,
                    Json(json!([{"externalId": id, "type": "sleep", "score": 0.9, "state": "high"}])),
                )
            }),
        )
        .route(
            "/api/v1/profile/archetypes/:id",
            get(|| async { Json(json!([{"name": "sleep_pattern", "value": "inconsistent"}])) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ProviderClient::new(ProviderConfig {
        base_url: format!("http://{}", addr),
        client_id: "id".into(),
        client_secret: "secret".into(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_sync_without_provider_is_503() {
    let app = setup().await;
    let (status, body) = app.post_empty("/api/admin/sync/abc").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "PROVIDER_UNAVAILABLE");

    let (status, _) = app.post_empty("/api/admin/sync").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_sync_one_merges_provider_data() {
    let provider = spawn_provider(false).await;
    let app = setup_with(SettingsFallback::default(), Some(provider)).await;

    let (status, body) = app.post_empty("/api/admin/sync/abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["externalId"], "abc");
    assert_eq!(body["created"], true);
    assert_eq!(body["counts"]["scores"], 1);
    assert_eq!(body["counts"]["archetypes"], 1);

    let (_, record) = app.get("/api/subjects/abc").await;
    assert_eq!(record["scores"]["sleep"], json!({"value": 0.9, "state": "high"}));
    assert_eq!(record["archetypes"]["sleep_pattern"], "inconsistent");

    // Backfill is idempotent like webhook replays
    let (_, again) = app.post_empty("/api/admin/sync/abc").await;
    assert_eq!(again["changed"], false);
}

#[tokio::test]
async fn test_sync_all_subjects() {
    let provider = spawn_provider(false).await;
    let app = setup_with(SettingsFallback::default(), Some(provider)).await;

    let (status, body) = app.post_empty("/api/admin/sync").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "synced": 2, "failed": []}));

    let (_, list) = app.get("/api/subjects").await;
    assert_eq!(list["subjects"], json!(["abc", "def"]));
}

#[tokio::test]
async fn test_sync_upstream_failure_is_502() {
    let provider = spawn_provider(true).await;
    let app = setup_with(SettingsFallback::default(), Some(provider)).await;

    let (status, body) = app.post_empty("/api/admin/sync/abc").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "PROVIDER_ERROR");
    assert_eq!(body["error"]["message"], "Provider returned HTTP 500");
    assert!(!app.aggregate_path().exists());
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup().await;
    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "pulse-hook");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_buildinfo_endpoint() {
    let app = setup().await;
    let (status, body) = app.get("/api/buildinfo").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["module"], "pulse-hook");
    assert!(body["git_hash"].is_string());
    assert!(body["build_profile"].is_string());
    assert!(body["started_at"].is_string());
}
