//! Pure-Rust redb storage backend.
//!
//! The persistent default: a single database file holding every key, the
//! on-disk counterpart of a browser's local storage. Feature-gated behind
//! `redb-backend`.
//!
//! redb uses a B-tree internally and every operation is transactional, so a
//! crash mid-write never leaves a half-written document behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadOnlyTable, Table, TableDefinition};

use crate::{StorageBackend, StorageError, validate_key};

/// The single table used for all key-value data.
const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("data");

/// A storage backend backed by redb.
///
/// Thread-safe via `Arc<Database>`. Blocking redb calls are offloaded to the
/// Tokio blocking thread pool.
///
/// # Examples
///
/// ```no_run
/// # use pagekeeper_storage::RedbBackend;
/// let backend = RedbBackend::open("./pagekeeper.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if redb fails to open or create the
    /// database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Opening the table in a write txn creates it if missing.
        let txn = db.begin_write().map_err(transaction_error)?;
        txn.open_table(DATA_TABLE).map_err(table_error)?;
        txn.commit().map_err(transaction_error)?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn transaction_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn table_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::MissingTable {
        name: format!("data: {e}"),
    }
}

impl RedbBackend {
    /// Run `op` against a read transaction on the blocking pool.
    async fn read<T, F>(&self, label: String, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&ReadOnlyTable<&'static str, &'static [u8]>, &str) -> Result<T, StorageError>
            + Send
            + 'static,
    {
        let db = Arc::clone(&self.db);
        let task = tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(transaction_error)?;
            let table = txn.open_table(DATA_TABLE).map_err(table_error)?;
            op(&table, label.as_str())
        });
        task.await.map_err(transaction_error)?
    }

    /// Run `op` inside a write transaction on the blocking pool and commit.
    async fn write<F>(&self, key: String, op: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Table<'_, &'static str, &'static [u8]>, &str) -> Result<(), StorageError>
            + Send
            + 'static,
    {
        let db = Arc::clone(&self.db);
        let task = tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(transaction_error)?;
            {
                let mut table = txn.open_table(DATA_TABLE).map_err(table_error)?;
                op(&mut table, key.as_str())?;
            }
            txn.commit().map_err(transaction_error)
        });
        task.await.map_err(transaction_error)?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        self.read(key.to_owned(), |table, key| {
            let value = table.get(key).map_err(|e| StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;
            Ok(value.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        let value = value.to_vec();
        self.write(key.to_owned(), move |table, key| {
            table
                .insert(key, value.as_slice())
                .map_err(|e| StorageError::Write {
                    key: key.to_owned(),
                    reason: e.to_string(),
                })?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.write(key.to_owned(), |table, key| {
            table.remove(key).map_err(|e| StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;
            Ok(())
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.read(prefix.to_owned(), |table, prefix| {
            let list_error = |e: redb::StorageError| StorageError::List {
                prefix: prefix.to_owned(),
                reason: e.to_string(),
            };
            let mut keys = Vec::new();
            for entry in table.range(prefix..).map_err(list_error)? {
                let (key, _) = entry.map_err(list_error)?;
                let key = key.value();
                if !key.starts_with(prefix) {
                    break;
                }
                keys.push(key.to_owned());
            }
            Ok(keys)
        })
        .await
    }
}
