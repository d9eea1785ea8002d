//! HTTP plumbing.
//!
//! - `Transport`: the request primitive, one exchange per call
//! - `ReqwestTransport`: the production transport
//! - `AuthClient`: wraps a transport with the refresh-and-retry policy

pub mod client;
pub mod reqwest_transport;
pub mod transport;

pub use client::AuthClient;
pub use reqwest_transport::ReqwestTransport;
pub use transport::{Credentials, HttpRequest, HttpResponse, Transport};
