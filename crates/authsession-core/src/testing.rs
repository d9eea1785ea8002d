//! Scripted transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::config::{AuthConfig, SessionOptions};
use crate::error::AuthError;
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::session::SessionStore;
use crate::storage::MemoryStorage;

pub(crate) const BASE_URL: &str = "http://backend.test";
pub(crate) const TOKEN_KEY: &str = "refresh_token";

enum Scripted {
    Respond(HttpResponse),
    Fail,
}

/// Replays queued responses per path and records every request it sees.
/// Paths with nothing queued answer 404.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn path_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .find('/')
        .map_or("/", |idx| &without_scheme[idx..]);
    path.split(['?', '#']).next().unwrap_or(path).to_string()
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, path: &str, status: u16, body: Value) {
        let status = StatusCode::from_u16(status).unwrap();
        let body = if body.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&body).unwrap()
        };
        self.push(path, Scripted::Respond(HttpResponse::new(status, body)));
    }

    /// Queue a network-level failure.
    pub(crate) fn fail(&self, path: &str) {
        self.push(path, Scripted::Fail);
    }

    pub(crate) fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    fn push(&self, path: &str, scripted: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(scripted);
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| path_of(&r.url) == path)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| path_of(&r.url) == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        let path = path_of(&request.url);
        self.requests.lock().unwrap().push(request);

        let delay = self.delays.lock().unwrap().get(&path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail) => Err(AuthError::Timeout),
            None => Ok(HttpResponse::new(StatusCode::NOT_FOUND, Vec::new())),
        }
    }
}

pub(crate) fn test_config() -> AuthConfig {
    AuthConfig {
        base_url: BASE_URL.to_string(),
        ..AuthConfig::default()
    }
}

pub(crate) fn session_body(username: &str, refresh_token: &str) -> Value {
    json!({
        "userData": {"username": username},
        "refreshToken": refresh_token,
    })
}

pub(crate) fn store_with(
    transport: &Arc<MockTransport>,
    storage: &Arc<MemoryStorage>,
) -> SessionStore {
    SessionStore::new(
        SessionOptions::new(test_config()),
        Arc::clone(transport) as Arc<dyn Transport>,
        Arc::clone(storage) as Arc<dyn crate::storage::TokenStorage>,
    )
}

#[test]
fn test_path_of() {
    assert_eq!(path_of("http://backend.test/auth/login"), "/auth/login");
    assert_eq!(path_of("http://backend.test/api?x=1"), "/api");
    assert_eq!(path_of("http://backend.test"), "/");
}
