//! Capacity-limited storage wrapper.
//!
//! Browsers cap local storage at a few megabytes and reject writes past that
//! limit. [`QuotaBackend`] reproduces that behavior on top of any backend so
//! the document stores can exercise their capacity recovery path against a
//! real limit instead of an unbounded disk.
//!
//! Usage is accounted as `key.len() + value.len()` per entry. The initial
//! usage is measured by scanning the wrapped backend once at construction.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{StorageBackend, StorageError};

/// A storage backend that enforces a byte budget over another backend.
pub struct QuotaBackend {
    inner: Arc<dyn StorageBackend>,
    limit: usize,
    /// Accounted size per key. Holding the lock across the inner write keeps
    /// the accounting consistent with what the inner backend stores.
    usage: Mutex<HashMap<String, usize>>,
}

impl QuotaBackend {
    /// Wrap `inner` with a capacity of `limit` bytes.
    ///
    /// Existing data counts against the limit; a backend that is already over
    /// budget accepts deletes and rejects every growing write.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] or [`StorageError::Read`] if the initial
    /// scan of `inner` fails.
    pub async fn wrap(inner: Arc<dyn StorageBackend>, limit: usize) -> Result<Self, StorageError> {
        let mut usage = HashMap::new();
        for key in inner.list("").await? {
            if let Some(value) = inner.get(&key).await? {
                usage.insert(key.clone(), entry_size(&key, &value));
            }
        }

        Ok(Self {
            inner,
            limit,
            usage: Mutex::new(usage),
        })
    }

    /// Total bytes currently accounted.
    pub async fn usage(&self) -> usize {
        self.usage.lock().await.values().sum()
    }

    /// The configured capacity in bytes.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

fn entry_size(key: &str, value: &[u8]) -> usize {
    key.len().saturating_add(value.len())
}

#[async_trait::async_trait]
impl StorageBackend for QuotaBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut usage = self.usage.lock().await;
        let current: usize = usage.values().sum();
        let previous = usage.get(key).copied().unwrap_or(0);
        let required = entry_size(key, value);
        let available = self.limit.saturating_sub(current.saturating_sub(previous));

        if required > available {
            tracing::debug!(key, required, available, "storage quota exceeded");
            return Err(StorageError::QuotaExceeded {
                key: key.to_owned(),
                required,
                available,
            });
        }

        self.inner.put(key, value).await?;
        usage.insert(key.to_owned(), required);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut usage = self.usage.lock().await;
        self.inner.delete(key).await?;
        usage.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }
}

impl std::fmt::Debug for QuotaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaBackend")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    async fn quota(limit: usize) -> (MemoryBackend, QuotaBackend) {
        let inner = MemoryBackend::new();
        let backend = QuotaBackend::wrap(Arc::new(inner.clone()), limit)
            .await
            .unwrap();
        (inner, backend)
    }

    #[tokio::test]
    async fn write_within_limit_succeeds() {
        let (_, backend) = quota(64).await;
        backend.put("k", b"0123456789").await.unwrap();
        assert_eq!(backend.usage().await, 11);
    }

    #[tokio::test]
    async fn write_past_limit_is_rejected_and_keeps_old_value() {
        let (_, backend) = quota(16).await;
        backend.put("k", b"small").await.unwrap();

        let err = backend.put("k", &[b'x'; 32]).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"small".to_vec()));
    }

    #[tokio::test]
    async fn overwrite_reuses_own_space() {
        let (_, backend) = quota(12).await;
        backend.put("k", &[b'a'; 10]).await.unwrap();
        // Replacing the same key only needs the difference.
        backend.put("k", &[b'b'; 11]).await.unwrap();
        assert_eq!(backend.usage().await, 12);
    }

    #[tokio::test]
    async fn delete_releases_capacity() {
        let (_, backend) = quota(20).await;
        backend.put("a", &[0; 15]).await.unwrap();
        assert!(backend.put("b", &[0; 10]).await.is_err());

        backend.delete("a").await.unwrap();
        backend.put("b", &[0; 10]).await.unwrap();
    }

    #[tokio::test]
    async fn existing_data_counts_against_limit() {
        let inner = MemoryBackend::new();
        inner.put("old", &[0; 50]).await.unwrap();

        let backend = QuotaBackend::wrap(Arc::new(inner), 60).await.unwrap();
        assert_eq!(backend.usage().await, 53);
        assert!(backend.put("new", &[0; 10]).await.is_err());
    }
}
