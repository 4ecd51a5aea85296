//! Shared helpers for connexa-api integration tests.

#![allow(dead_code)]

use connexa_api::{ApiVersion, ConnexaClient, ConnexaConfig};
use connexa_core::executor::{ExecutorEvent, ExecutorObserver};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Get the path to the test fixtures directory.
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Load and parse a JSON fixture.
pub fn load_fixture(name: &str) -> Value {
    let fixture_path = fixtures_dir().join(name);
    let raw = fs::read_to_string(&fixture_path).unwrap_or_else(|e| {
        panic!(
            "Failed to read fixture at {}: {}",
            fixture_path.display(),
            e
        )
    });
    serde_json::from_str(&raw)
        .unwrap_or_else(|e| panic!("Fixture {} is not valid JSON: {}", name, e))
}

/// Configuration pointing both the API and OAuth endpoints at `server`.
///
/// `overrides` are merged over fast, jitter-free test defaults.
pub fn config(server: &MockServer, overrides: Value) -> ConnexaConfig {
    let mut raw = json!({
        "api_url": server.uri(),
        "auth_url": format!("{}/oauth", server.uri()),
        "client_id": "test-client",
        "client_secret": "test-secret",
        "allow_http": true,
        "backoff_factor_secs": 0.01,
        "backoff_jitter": false,
        "read_timeout_secs": 5.0,
    });
    if let (Some(base), Value::Object(extra)) = (raw.as_object_mut(), overrides) {
        base.extend(extra);
    }
    serde_json::from_value(raw).expect("test configuration should deserialize")
}

/// Serve a long-lived token from `/oauth/token`.
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "integration-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Client pinned to `version`, so no detection probe is sent.
pub async fn client(server: &MockServer, version: ApiVersion, overrides: Value) -> ConnexaClient {
    let mut cfg = config(server, overrides);
    cfg.api_version = Some(version);
    ConnexaClient::new(cfg)
        .await
        .expect("client should build from a valid configuration")
}

/// Observer that keeps every event it sees.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ExecutorEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ExecutorEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                ExecutorEvent::Retrying { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }
}

impl ExecutorObserver for RecordingObserver {
    fn on_event(&self, event: &ExecutorEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
