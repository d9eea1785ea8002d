//! Session state: the store, its data types and the listener registry.
//!
//! `SessionStore` is the single source of truth for whether a session
//! exists. It changes only through `start_session` / `end_session`, and
//! every change is fanned out to registered listeners in order.

pub mod data;
pub mod listeners;
pub mod store;

pub use data::{Session, UserData};
pub use listeners::{Listener, ListenerId};
pub use store::SessionStore;
