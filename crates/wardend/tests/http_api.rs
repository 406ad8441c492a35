//! HTTP surface tests, driven through the router without a socket

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use warden_common::{ConfigStore, StatePaths};
use wardend::server::{router, AppState};
use wardend::{DeviceProbe, Engine, TcpLineSink};

const SECRET: &str = "s3cret";

struct Unreachable;

impl DeviceProbe for Unreachable {
    fn probe(&self, _address: &str, _timeout: Duration) -> Result<(), String> {
        Err("no route to host".to_string())
    }
}

struct Harness {
    _dir: TempDir,
    paths: StatePaths,
    engine: Engine,
    app: Router,
}

fn harness(extra_env: &[(&str, &str)]) -> Harness {
    let dir = TempDir::new().unwrap();
    let paths = StatePaths::new(dir.path());

    let mut env = HashMap::new();
    env.insert("WARDEN_ADMIN_SECRET".to_string(), SECRET.to_string());
    for (k, v) in extra_env {
        env.insert(k.to_string(), v.to_string());
    }
    let store = Arc::new(ConfigStore::with_env(paths.clone(), env));

    let snapshot = store.load().unwrap();
    let engine = Engine::new(snapshot, &paths, Arc::new(Unreachable), Arc::new(TcpLineSink)).unwrap();
    let app = router(Arc::new(AppState::new(engine.clone(), store)));

    Harness {
        _dir: dir,
        paths,
        engine,
        app,
    }
}

async fn call(app: &Router, method: &str, uri: &str, secret: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(secret) = secret {
        builder = builder.header("x-admin-secret", secret);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn liveness_is_open() {
    let h = harness(&[]);
    let (status, body) = call(&h.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["version"], warden_common::VERSION);

    let (status, body) = call(&h.app, "GET", "/api/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["health"]["state"], "UNKNOWN");
    assert_eq!(body["mode"]["desired_mode"], "mock");
}

#[tokio::test]
async fn mutating_routes_require_secret() {
    let h = harness(&[]);
    for (method, uri) in [
        ("GET", "/api/config"),
        ("POST", "/api/device/test"),
        ("POST", "/api/supervisor/start"),
    ] {
        let (status, body) = call(&h.app, method, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        assert_eq!(body, json!({"ok": false, "error": "unauthorized"}));

        let (status, _) = call(&h.app, method, uri, Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn empty_secret_denies_everything() {
    let h = harness(&[("WARDEN_ADMIN_SECRET", "")]);
    let (status, _) = call(&h.app, "POST", "/api/device/test", Some(""), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn config_write_hot_applies_and_invalidates() {
    let h = harness(&[]);

    // Validate in mock mode first
    let (status, body) = call(&h.app, "POST", "/api/device/test", Some(SECRET), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["validated"], true);
    assert!(body.get("error").is_none());

    let edit = json!({"mode": "LIVE (hardware)", "device_host": " 10.0.0.5 ", "device_port": 1710});
    let (status, body) = call(&h.app, "POST", "/api/config", Some(SECRET), Some(edit)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["saved"]["mode"], "live");
    assert_eq!(body["saved"]["device_host"], "10.0.0.5");
    assert_eq!(body["mode_source"]["layer"], "document");
    assert_eq!(body["mode_source"]["key"], "mode");
    assert_eq!(body["validation_cleared"], true);
    assert_eq!(body["restart_requested"], true);

    // Applied before the response was sent
    let (_, mode) = call(&h.app, "GET", "/api/mode", None, None).await;
    assert_eq!(mode["desired_mode"], "live");
    assert_eq!(mode["validated"], false);
    assert_eq!(mode["config_changed"], true);
    assert!(h.paths.restart_request().exists());

    let (status, body) = call(&h.app, "GET", "/api/config", Some(SECRET), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["device_host"], "10.0.0.5");
    assert_eq!(body["admin_secret_set"], true);
    assert_eq!(body["provenance"]["admin_secret"]["layer"], "environment");
    assert!(body.get("admin_secret").is_none());
}

#[tokio::test]
async fn invalid_config_is_rejected_without_writing() {
    let h = harness(&[]);
    let edit = json!({"mode": "live", "device_host": "10.0.0.5", "device_port": 70000});
    let (status, body) = call(&h.app, "POST", "/api/config", Some(SECRET), Some(edit)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("70000"));
    assert!(!h.paths.config().exists());

    let edit = json!({"mode": "turbo"});
    let (status, _) = call(&h.app, "POST", "/api/config", Some(SECRET), Some(edit)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_body_gets_json_error() {
    let h = harness(&[]);
    let request = Request::builder()
        .method("POST")
        .uri("/api/controls")
        .header("x-admin-secret", SECRET)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn controls_route_enforces_allowlist_and_gate() {
    let h = harness(&[("WARDEN_MODE", "live"), ("WARDEN_DEVICE_HOST", "10.0.0.5")]);

    let write = json!({"id": "phantom_bus", "value": 1.0});
    let (status, _) = call(&h.app, "POST", "/api/controls", Some(SECRET), Some(write)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    for _ in 0..3 {
        let (status, body) = call(&h.app, "POST", "/api/device/test", Some(SECRET), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], false);
        assert_eq!(body["validated"], false);
        assert!(!body["error"].as_str().unwrap().is_empty());
    }
    assert_eq!(h.engine.health().consecutive_failures, 3);

    let write = json!({"id": "master_gain", "value": -6.0});
    let (status, body) = call(&h.app, "POST", "/api/controls", Some(SECRET), Some(write)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("disconnected"));

    let (_, timeline) = call(&h.app, "GET", "/api/device/timeline?limit=1000", None, None).await;
    assert_eq!(timeline["limit"], 500);
    assert_eq!(timeline["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_timeline_query_gets_json_error() {
    let h = harness(&[]);
    for uri in ["/api/device/timeline?limit=abc", "/api/device/timeline?limit=-1"] {
        let (status, body) = call(&h.app, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["ok"], false);
        assert!(body["error"].is_string());
    }

    let (status, body) = call(&h.app, "GET", "/api/device/timeline", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn mock_controls_are_cached() {
    let h = harness(&[]);
    let write = json!({"id": "master_mute", "value": 1.0});
    let (status, body) = call(&h.app, "POST", "/api/controls", Some(SECRET), Some(write)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true, "id": "master_mute", "value": 1.0}));
    assert_eq!(h.engine.controls().get("master_mute"), Some(&1.0));
}
