//! `Transport` implementation on top of reqwest.
//!
//! Two clients share the same timeout settings: a credentialed one with a
//! cookie store (access tokens delivered as cookies live here) and an
//! anonymous one without. `Credentials::Omit` requests go through the
//! anonymous client so no session cookie can leak into them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::transport::{Credentials, HttpRequest, HttpResponse, Transport};
use crate::config::AuthConfig;
use crate::error::AuthError;

/// Transport backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    credentialed: Client,
    anonymous: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let credentialed = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        let anonymous = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            credentialed,
            anonymous,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(config.request_timeout())
    }

    fn client(&self, credentials: Credentials) -> &Client {
        match credentials {
            Credentials::Include => &self.credentialed,
            Credentials::Omit => &self.anonymous,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            credentials,
        } = request;

        debug!(method = %method, url = %url, ?credentials, "Sending request");

        let mut builder = self.client(credentials).request(method, &url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout
            } else {
                AuthError::Network(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Received response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
