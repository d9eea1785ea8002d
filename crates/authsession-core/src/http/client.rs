//! Request wrapper that makes token refresh invisible to callers.
//!
//! Every call goes through a fixed two-step protocol: send once, and only
//! if the backend answers 401 to a credentialed request, refresh the
//! session and send exactly once more. There is no loop.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::transport::{Credentials, HttpRequest, HttpResponse, Transport};
use crate::config::Endpoint;
use crate::error::AuthError;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AuthClient {
    store: SessionStore,
    transport: Arc<dyn Transport>,
}

impl AuthClient {
    /// Wrap the transport the store itself talks to.
    pub fn new(store: SessionStore) -> Self {
        let transport = store.transport();
        Self { store, transport }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn get(&self, target: &str) -> Result<HttpResponse, AuthError> {
        self.request(HttpRequest::get(target)).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        target: &str,
        body: &B,
    ) -> Result<HttpResponse, AuthError> {
        self.request(HttpRequest::post(target).json(body)?).await
    }

    /// Send `request`, refreshing the session and retrying once on a 401.
    ///
    /// Relative targets resolve against the configured base URL. The
    /// credentials mode on the incoming request is overwritten: credentials
    /// are sent only while a refresh token is held, except to the login
    /// endpoint. If the refresh fails the original 401 is returned and the
    /// session has already ended by the time this returns.
    pub async fn request(&self, mut request: HttpRequest) -> Result<HttpResponse, AuthError> {
        self.store.mark_in_use();
        let config = self.store.config();
        request.url = config.resolve(&request.url);

        let is_login = config.is_endpoint(&request.url, Endpoint::Login);
        let is_refresh = config.is_endpoint(&request.url, Endpoint::Refresh);
        request.credentials = if is_login || self.store.has_refresh_token() {
            Credentials::Include
        } else {
            Credentials::Omit
        };

        let response = self.send(request.clone()).await?;

        let may_refresh = response.status().as_u16() == 401
            && request.credentials == Credentials::Include
            && !is_login
            && !is_refresh;
        if !may_refresh {
            return Ok(response);
        }

        debug!(url = %request.url, "Got 401, attempting session refresh");
        if !self.store.refresh().await {
            debug!(url = %request.url, "Refresh failed, returning original 401");
            return Ok(response);
        }

        debug!(url = %request.url, "Session refreshed, retrying request");
        self.send(request).await
    }

    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, AuthError> {
        if request.credentials == Credentials::Include {
            self.store.authorize(&mut request)?;
        }
        self.transport.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use reqwest::header::AUTHORIZATION;
    use serde_json::json;

    use super::*;
    use crate::session::UserData;
    use crate::storage::{MemoryStorage, TokenStorage};
    use crate::testing::{session_body, store_with, MockTransport, TOKEN_KEY};

    const API: &str = "/api/items";
    const REFRESH: &str = "/auth/refresh";

    fn client_with(transport: &Arc<MockTransport>, storage: &Arc<MemoryStorage>) -> AuthClient {
        AuthClient::new(store_with(transport, storage))
    }

    fn signed_in(transport: &Arc<MockTransport>) -> (AuthClient, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(transport, &storage);
        client.store().start_session(
            UserData::from_value(json!({"username": "alice"})).unwrap(),
            "rt-1",
        );
        (client, storage)
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let transport = MockTransport::new();
        let (client, _storage) = signed_in(&transport);
        transport.respond(API, 200, json!({"items": []}));

        let response = client.get(API).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(transport.calls(API), 1);
        assert_eq!(transport.calls(REFRESH), 0);
    }

    #[tokio::test]
    async fn test_401_then_refresh_then_retry() {
        let transport = MockTransport::new();
        let (client, storage) = signed_in(&transport);
        transport.respond(API, 401, json!({}));
        transport.respond(REFRESH, 200, session_body("alice", "rt-2"));
        transport.respond(API, 200, json!({"items": [1, 2]}));

        let response = client.get(API).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["items"], json!([1, 2]));
        assert_eq!(transport.calls(API), 2);
        assert_eq!(transport.calls(REFRESH), 1);
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn test_401_with_failed_refresh_returns_original() {
        let transport = MockTransport::new();
        let (client, storage) = signed_in(&transport);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client
            .store()
            .add_listener(move |data| sink.lock().unwrap().push(data.is_some()));

        transport.respond(API, 401, json!({"reason": "Invalid or outdated access token"}));
        transport.respond(REFRESH, 400, json!({"reason": "Bad refresh token"}));

        let response = client.get(API).await.unwrap();
        assert_eq!(response.status().as_u16(), 401);
        assert_eq!(
            response.json::<serde_json::Value>().unwrap()["reason"],
            "Invalid or outdated access token"
        );
        assert_eq!(transport.calls(API), 1);
        assert!(!client.store().is_active());
        assert!(storage.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_retry_happens_at_most_once() {
        let transport = MockTransport::new();
        let (client, _storage) = signed_in(&transport);
        transport.respond(API, 401, json!({}));
        transport.respond(REFRESH, 200, session_body("alice", "rt-2"));
        transport.respond(API, 401, json!({}));

        let response = client.get(API).await.unwrap();
        assert_eq!(response.status().as_u16(), 401);
        assert_eq!(transport.calls(API), 2);
        assert_eq!(transport.calls(REFRESH), 1);
        assert!(client.store().is_active());
    }

    #[tokio::test]
    async fn test_anonymous_request_omits_credentials_and_never_refreshes() {
        let transport = MockTransport::new();
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(&transport, &storage);
        transport.respond(API, 401, json!({}));

        let response = client.get(API).await.unwrap();
        assert_eq!(response.status().as_u16(), 401);
        assert_eq!(transport.calls(REFRESH), 0);

        let sent = transport.requests_to(API);
        assert_eq!(sent[0].credentials, Credentials::Omit);
        assert!(sent[0].headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_login_endpoint_always_includes_credentials() {
        let transport = MockTransport::new();
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(&transport, &storage);
        transport.respond("/auth/login", 401, json!({}));

        let response = client
            .post_json("/auth/login", &json!({"username": "a", "password": "b"}))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);

        let sent = transport.requests_to("/auth/login");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].credentials, Credentials::Include);
        assert_eq!(transport.calls(REFRESH), 0);
    }

    #[tokio::test]
    async fn test_refresh_endpoint_401_does_not_recurse() {
        let transport = MockTransport::new();
        let (client, _storage) = signed_in(&transport);
        transport.respond(REFRESH, 401, json!({}));

        let response = client
            .post_json(REFRESH, &json!({"refreshToken": "rt-1"}))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
        assert_eq!(transport.calls(REFRESH), 1);
        assert!(client.store().is_active());
    }

    #[tokio::test]
    async fn test_retry_carries_new_bearer_token() {
        let transport = MockTransport::new();
        let storage = Arc::new(MemoryStorage::with_entry(TOKEN_KEY, "rt-1"));
        let client = client_with(&transport, &storage);
        transport.respond(API, 401, json!({}));
        transport.respond(
            REFRESH,
            200,
            json!({"userData": {"username": "alice"}, "refreshToken": "rt-2", "accessToken": "at-2"}),
        );
        transport.respond(API, 200, json!({}));

        let response = client.get(API).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let sent = transport.requests_to(API);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].credentials, Credentials::Include);
        assert!(sent[0].headers.get(AUTHORIZATION).is_none());
        assert_eq!(sent[1].headers.get(AUTHORIZATION).unwrap(), "Bearer at-2");
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let transport = MockTransport::new();
        let (client, _storage) = signed_in(&transport);
        transport.delay(REFRESH, Duration::from_millis(20));
        for _ in 0..3 {
            transport.respond(API, 401, json!({}));
        }
        transport.respond(REFRESH, 200, session_body("alice", "rt-2"));
        for _ in 0..3 {
            transport.respond(API, 200, json!({}));
        }

        let responses = futures::future::join_all((0..3).map(|_| client.get(API))).await;

        for response in responses {
            assert_eq!(response.unwrap().status().as_u16(), 200);
        }
        assert_eq!(transport.calls(REFRESH), 1);
        assert_eq!(transport.calls(API), 6);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let transport = MockTransport::new();
        let (client, _storage) = signed_in(&transport);
        transport.fail(API);

        let result = client.get(API).await;
        assert!(matches!(result, Err(AuthError::Timeout)));
        assert!(client.store().is_active());
    }
}
