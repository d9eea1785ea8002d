//! Client-side session management for access/refresh token authentication.
//!
//! This crate provides:
//! - `SessionStore`: owns the session, persists the refresh token and
//!   notifies listeners of every change
//! - `AuthClient`: sends requests and transparently refreshes the session
//!   and retries once when the backend answers 401
//! - `TokenStorage` backends for the persisted refresh token
//!
//! ```no_run
//! use std::sync::Arc;
//! use authsession_core::{AuthClient, AuthConfig, FileStorage, ReqwestTransport, SessionStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AuthConfig::load()?;
//! let transport = Arc::new(ReqwestTransport::from_config(&config)?);
//! let storage = Arc::new(FileStorage::default_location()?);
//! let store = SessionStore::new(config, transport, storage);
//! let client = AuthClient::new(store.clone());
//!
//! if store.login("alice", "secret").await {
//!     let response = client.get("/api/profile").await?;
//!     println!("{}", response.status());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::{AbortCallback, AuthConfig, Endpoint, SessionOptions};
pub use error::{AuthError, StorageError};
pub use http::{AuthClient, Credentials, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use session::{ListenerId, SessionStore, UserData};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, TokenStorage};
