//! Durable string key/value storage for the refresh token.
//!
//! The session store persists exactly one entry through this trait: the
//! current refresh token, under the configured key. Three backends ship:
//! - `MemoryStorage`: process-local, for tests and ephemeral sessions
//! - `FileStorage`: a JSON map in the user's data directory
//! - `KeyringStorage`: the OS keychain via `keyring`

pub mod file;
pub mod keyring;
pub mod memory;

pub use self::file::FileStorage;
pub use self::keyring::KeyringStorage;
pub use self::memory::MemoryStorage;

use crate::error::StorageError;

pub trait TokenStorage: Send + Sync {
    /// Value stored under `key`, or `None` when nothing is stored.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
