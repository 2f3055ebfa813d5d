//! Shared read and write paths for JSON documents in a storage backend.

use pagekeeper_storage::{StorageBackend, StorageError};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::parse_stored;
use crate::error::StoreError;
use crate::keys;

/// Read a stored JSON object.
///
/// Missing keys, read failures, and malformed data all yield `None`; the
/// latter two are logged at `warn`.
pub(crate) async fn load_object(backend: &dyn StorageBackend, key: &str) -> Option<Map<String, Value>> {
    let bytes = match backend.get(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read stored document, using defaults");
            return None;
        }
    };
    let parsed = parse_stored(&bytes);
    if parsed.is_none() {
        tracing::warn!(key, bytes = bytes.len(), "stored document is malformed, ignoring it");
    }
    parsed
}

/// Read a stored JSON value of any shape, or `None` if missing or malformed.
pub(crate) async fn load_value(backend: &dyn StorageBackend, key: &str) -> Option<Value> {
    match backend.get(key).await {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "stored value is malformed, ignoring it");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read stored value");
            None
        }
    }
}

/// Serialize a value for storage.
pub(crate) fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}

/// Delete every key under the disposable prefixes. Returns the number of
/// deleted keys. Failures are logged and skipped.
pub(crate) async fn free_disposable(backend: &dyn StorageBackend) -> usize {
    let mut freed = 0usize;
    for prefix in keys::DISPOSABLE {
        let found = match backend.list(prefix).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "failed to list disposable keys");
                continue;
            }
        };
        for key in found {
            match backend.delete(&key).await {
                Ok(()) => freed = freed.saturating_add(1),
                Err(e) => tracing::warn!(key, error = %e, "failed to delete disposable key"),
            }
        }
    }
    freed
}

/// Write `bytes` at `key`, recovering once from a capacity failure.
///
/// On [`StorageError::QuotaExceeded`] the disposable keys are deleted and
/// `shrink` gets one chance to produce a smaller encoding; the write is then
/// retried once. A second capacity failure becomes
/// [`StoreError::StorageExhausted`].
pub(crate) async fn put_with_recovery<F>(
    backend: &dyn StorageBackend,
    key: &str,
    bytes: Vec<u8>,
    shrink: F,
) -> Result<(), StoreError>
where
    F: FnOnce() -> Option<Vec<u8>>,
{
    match backend.put(key, &bytes).await {
        Ok(()) => return Ok(()),
        Err(e) if e.is_quota_exceeded() => {
            tracing::warn!(key, size = bytes.len(), error = %e, "storage full, attempting recovery");
        }
        Err(e) => return Err(e.into()),
    }

    let freed = free_disposable(backend).await;
    let retry = shrink().unwrap_or(bytes);
    tracing::info!(key, freed, size = retry.len(), "retrying write after recovery");

    backend.put(key, &retry).await.map_err(|e| exhausted(key, e))
}

fn exhausted(key: &str, err: StorageError) -> StoreError {
    if err.is_quota_exceeded() {
        tracing::error!(key, error = %err, "write failed after recovery");
        StoreError::StorageExhausted {
            key: key.to_owned(),
            reason: err.to_string(),
        }
    } else {
        StoreError::Storage(err)
    }
}
