//! Storage backend abstraction for `Pagekeeper`.
//!
//! This crate defines the [`StorageBackend`] trait, a pure key-value storage
//! interface that knows nothing about page content, settings, or credentials.
//! The document stores in `pagekeeper-core` serialize their documents to JSON
//! and hand the bytes to this layer.
//!
//! Three implementations are provided:
//!
//! - [`RedbBackend`]: persistent default, backed by redb (feature `redb-backend`)
//! - [`MemoryBackend`]: in-memory, used for session-scoped data and tests
//! - [`QuotaBackend`]: wraps any backend and enforces a byte capacity, the
//!   way a browser enforces its local storage quota

mod error;
mod memory;
mod quota;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
pub use quota::QuotaBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// Check that `key` is a non-empty `/`-separated path of non-empty segments
/// without whitespace or control characters.
///
/// Every backend in this crate applies it in `get`, `put`, and `delete`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] naming the broken rule.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.split('/').any(str::is_empty) {
        "key has an empty segment"
    } else if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "key contains whitespace or control characters"
    } else {
        return Ok(());
    };
    Err(StorageError::InvalidKey {
        key: key.to_owned(),
        reason,
    })
}

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `content/site`,
/// `config/snapshots/1718000000000`) and must pass [`validate_key`]; list
/// prefixes are not validated. Values are opaque byte arrays; in
/// practice always UTF-8 JSON written by a document store.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails, or
    /// [`StorageError::QuotaExceeded`] if the backend is capacity-limited and
    /// the value does not fit.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. This is idempotent: deleting a non-existent key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
