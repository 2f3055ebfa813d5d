//! The landing-page content store.
//!
//! [`ContentStore`] holds the canonical content [`Document`] of one instance.
//! Every commit follows the same sequence:
//!
//! 1. serialize and persist the full document to `content/site`, recovering
//!    once from a capacity failure;
//! 2. call every subscribed listener;
//! 3. publish a same-process [`ContentEvent`] and update the watch channel;
//! 4. write the deployment envelope (best effort);
//! 5. publish `ContentUpdated` on the sync bus.
//!
//! If persisting fails the in-memory document still holds the attempted
//! change and [`ContentStore::has_unsaved_changes`] reports it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, warn};

use crate::content::{ItemList, default_content, item_id, next_item_id};
use crate::document::{Document, merge_over_defaults, normalize_links, parse_object, parse_stored};
use crate::error::{ImportError, StoreError};
use crate::keys;
use crate::notify::{Change, ChangeKind, Notifier, Subscription};
use crate::persist;
use crate::site::StoreContext;
use crate::sync::{SignalKind, SyncSignal};

/// Version tag of the deployment envelope format.
pub const DEPLOYMENT_VERSION: &str = "1.0.0";

/// A committed content change.
pub type ContentEvent = Change<Document>;

/// Tuning for [`ContentStore`].
#[derive(Debug, Clone)]
pub struct ContentOptions {
    /// Serialized size above which the document is compacted before writing.
    pub compact_threshold_bytes: usize,
    /// Inline `data:` images longer than this are cleared by compaction.
    pub inline_image_limit_bytes: usize,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            compact_threshold_bytes: 3 * 1024 * 1024,
            inline_image_limit_bytes: 150_000,
        }
    }
}

/// Deployment-ready copy of the content, regenerated on every commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEnvelope {
    pub content: Document,
    pub timestamp: String,
    pub version: String,
    pub build_ready: bool,
    pub metadata: DeploymentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    pub last_modified: String,
    pub content_size: usize,
    pub sections: Vec<String>,
}

struct ContentState {
    document: Document,
    /// Highest id this instance has seen assigned or removed, per list.
    issued: HashMap<ItemList, u64>,
    unsaved: bool,
}

/// Canonical content document of one instance.
pub struct ContentStore {
    ctx: StoreContext,
    options: ContentOptions,
    defaults: Document,
    state: Mutex<ContentState>,
    notifier: Notifier<Document>,
}

impl ContentStore {
    /// Load the stored document merged over the defaults.
    ///
    /// Missing, unreadable, or malformed stored data yields the default
    /// document.
    pub async fn open(ctx: StoreContext, options: ContentOptions) -> Self {
        let defaults = default_content();
        let document = match persist::load_object(&*ctx.storage, keys::CONTENT).await {
            Some(stored) => merge_over_defaults(&defaults, stored),
            None => defaults.clone(),
        };
        debug!(sections = document.len(), "content store opened");

        Self {
            notifier: Notifier::new(Arc::new(document.clone())),
            state: Mutex::new(ContentState {
                document,
                issued: HashMap::new(),
                unsaved: false,
            }),
            ctx,
            options,
            defaults,
        }
    }

    /// A copy of the current document.
    pub async fn document(&self) -> Document {
        self.state.lock().await.document.clone()
    }

    /// The compiled-in default document.
    #[must_use]
    pub fn defaults(&self) -> &Document {
        &self.defaults
    }

    /// Whether the in-memory document holds a change that failed to persist.
    pub async fn has_unsaved_changes(&self) -> bool {
        self.state.lock().await.unsaved
    }

    /// Shallow-merge section updates into the document and commit.
    ///
    /// # Errors
    ///
    /// [`StoreError::StorageExhausted`] if the document does not fit even
    /// after recovery; [`StoreError::Storage`] for other backend failures.
    pub async fn update_sections(&self, mut partial: Map<String, Value>) -> Result<(), StoreError> {
        for value in partial.values_mut() {
            normalize_links(value);
        }
        let names: Vec<String> = partial.keys().cloned().collect();

        let mut state = self.state.lock().await;
        state.document.apply_sections(partial);
        self.commit(&mut state, ChangeKind::Updated).await?;
        info!(sections = ?names, "content sections updated");
        Ok(())
    }

    /// Replace a single section and commit.
    ///
    /// # Errors
    ///
    /// See [`ContentStore::update_sections`].
    pub async fn update_section(&self, name: &str, value: Value) -> Result<(), StoreError> {
        let mut partial = Map::new();
        partial.insert(name.to_owned(), value);
        self.update_sections(partial).await
    }

    /// Replace the document with the defaults and commit.
    ///
    /// # Errors
    ///
    /// See [`ContentStore::update_sections`].
    pub async fn reset_to_default(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.document = self.defaults.clone();
        self.commit(&mut state, ChangeKind::Reset).await?;
        info!("content reset to defaults");
        Ok(())
    }

    /// Pretty-printed JSON of the current document.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialization`] if the document cannot be encoded.
    pub async fn export_document(&self) -> Result<String, StoreError> {
        let state = self.state.lock().await;
        serde_json::to_string_pretty(&state.document).map_err(|e| StoreError::Serialization {
            key: keys::CONTENT.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Replace the document with `text` merged over the defaults.
    ///
    /// Nothing changes if `text` is not a JSON object.
    ///
    /// # Errors
    ///
    /// [`ImportError::Parse`] or [`ImportError::NotAnObject`] for bad input;
    /// [`ImportError::Store`] if the merged document cannot be committed.
    pub async fn import_document(&self, text: &str) -> Result<(), ImportError> {
        let mut imported = parse_object(text)?;
        for value in imported.values_mut() {
            normalize_links(value);
        }

        let mut state = self.state.lock().await;
        state.document = merge_over_defaults(&self.defaults, imported);
        self.commit(&mut state, ChangeKind::Imported).await?;
        info!(sections = state.document.len(), "content imported");
        Ok(())
    }

    /// Append an item to a list, assigning it a fresh id.
    ///
    /// Any `id` on `item` is replaced. Ids are never reused by this instance,
    /// even after the item holding them is removed.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidItem`] if `item` is not an object or the list
    /// already holds id `u64::MAX`,
    /// [`StoreError::MissingList`] if the section holds no list, or any
    /// commit error.
    pub async fn insert_item(&self, list: ItemList, item: Value) -> Result<u64, StoreError> {
        let Value::Object(mut fields) = item else {
            return Err(StoreError::InvalidItem {
                reason: format!("{list} items must be JSON objects"),
            });
        };

        let mut state = self.state.lock().await;
        let issued = state.issued.get(&list).copied().unwrap_or(0);
        let items = list_mut(&mut state.document, list)?;
        let id = next_item_id(items)
            .zip(issued.checked_add(1))
            .map(|(next, after_issued)| next.max(after_issued))
            .ok_or_else(|| StoreError::InvalidItem {
                reason: format!("{list} item ids are exhausted"),
            })?;

        fields.insert("id".to_owned(), Value::from(id));
        let mut item = Value::Object(fields);
        normalize_links(&mut item);
        items.push(item);
        state.issued.insert(list, id);

        self.commit(&mut state, ChangeKind::Updated).await?;
        info!(%list, id, "content item inserted");
        Ok(id)
    }

    /// Shallow-merge `patch` into the item with `id`. The id itself cannot be
    /// changed. Returns `false` if no such item exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingList`] or any commit error.
    pub async fn update_item(
        &self,
        list: ItemList,
        id: u64,
        mut patch: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        patch.remove("id");
        for value in patch.values_mut() {
            normalize_links(value);
        }

        let mut state = self.state.lock().await;
        let items = list_mut(&mut state.document, list)?;
        let Some(Value::Object(fields)) = items.iter_mut().find(|i| item_id(i) == Some(id)) else {
            return Ok(false);
        };
        fields.extend(patch);

        self.commit(&mut state, ChangeKind::Updated).await?;
        info!(%list, id, "content item updated");
        Ok(true)
    }

    /// Remove the item with `id`. Other items and their ids are untouched.
    /// Returns `false` if no such item exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingList`] or any commit error.
    pub async fn remove_item(&self, list: ItemList, id: u64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let items = list_mut(&mut state.document, list)?;
        let before = items.len();
        items.retain(|i| item_id(i) != Some(id));
        if items.len() == before {
            return Ok(false);
        }

        let issued = state.issued.entry(list).or_insert(0);
        *issued = (*issued).max(id);

        self.commit(&mut state, ChangeKind::Updated).await?;
        info!(%list, id, "content item removed");
        Ok(true)
    }

    /// Items of a list, in stored order.
    pub async fn items(&self, list: ItemList) -> Vec<Value> {
        let state = self.state.lock().await;
        state
            .document
            .get(list.section())
            .and_then(|s| s.get(list.field()))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Re-read the stored document and adopt it if it differs.
    ///
    /// Listeners are notified of an adopted change; nothing is persisted or
    /// published. Returns whether the document changed. A read failure keeps
    /// the current document.
    pub async fn reload(&self) -> bool {
        // Held across the read so a commit cannot land between read and adopt.
        let mut state = self.state.lock().await;
        let stored = match self.ctx.storage.get(keys::CONTENT).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "content reload failed, keeping current document");
                return false;
            }
        };
        let loaded = match stored.as_deref().map(parse_stored) {
            Some(Some(map)) => merge_over_defaults(&self.defaults, map),
            Some(None) => {
                warn!("stored content is malformed, keeping current document");
                return false;
            }
            None => self.defaults.clone(),
        };

        if loaded == state.document {
            return false;
        }
        state.document = loaded;
        state.unsaved = false;
        self.notifier
            .notify(ChangeKind::Reloaded, Arc::new(state.document.clone()));
        info!("content reloaded from storage");
        true
    }

    /// Register a listener that receives every committed document.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Document) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    /// Receiver that always holds the latest committed document.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Document>> {
        self.notifier.watch()
    }

    /// Receiver of every content change committed after this call.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ContentEvent> {
        self.notifier.events()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.notifier.listener_count()
    }

    /// Deployment envelope for the current document.
    pub async fn deployment_data(&self) -> DeploymentEnvelope {
        let document = self.document().await;
        let size = persist::encode(keys::CONTENT, &document).map_or(0, |b| b.len());
        self.envelope(document, size)
    }

    fn envelope(&self, content: Document, content_size: usize) -> DeploymentEnvelope {
        let now = iso_timestamp(self.ctx.clock.now_ms());
        let sections = content.section_names().map(str::to_owned).collect();
        DeploymentEnvelope {
            content,
            timestamp: now.clone(),
            version: DEPLOYMENT_VERSION.to_owned(),
            build_ready: true,
            metadata: DeploymentMetadata {
                last_modified: now,
                content_size,
                sections,
            },
        }
    }

    async fn commit(&self, state: &mut ContentState, kind: ChangeKind) -> Result<(), StoreError> {
        state.unsaved = true;

        let mut bytes = persist::encode(keys::CONTENT, &state.document)?;
        if bytes.len() > self.options.compact_threshold_bytes
            && compact(&mut state.document, self.options.inline_image_limit_bytes) > 0
        {
            bytes = persist::encode(keys::CONTENT, &state.document)?;
        }

        let limit = self.options.inline_image_limit_bytes;
        let document = &mut state.document;
        persist::put_with_recovery(&*self.ctx.storage, keys::CONTENT, bytes, || {
            if compact(document, limit) > 0 {
                persist::encode(keys::CONTENT, &*document).ok()
            } else {
                None
            }
        })
        .await?;
        state.unsaved = false;

        let committed = Arc::new(state.document.clone());
        self.notifier.notify(kind, Arc::clone(&committed));
        self.write_deployment_backup(&committed).await;
        self.ctx.bus.publish(SyncSignal::new(
            SignalKind::ContentUpdated,
            self.ctx.clock.now_ms(),
            self.ctx.instance.clone(),
        ));
        Ok(())
    }

    async fn write_deployment_backup(&self, document: &Document) {
        let size = persist::encode(keys::CONTENT, document).map_or(0, |b| b.len());
        let envelope = self.envelope(document.clone(), size);
        let bytes = match persist::encode(keys::DEPLOYMENT_BACKUP, &envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode deployment envelope");
                return;
            }
        };

        if let Err(e) = self.ctx.storage.put(keys::DEPLOYMENT_BACKUP, &bytes).await {
            warn!(error = %e, "deployment backup not written");
        }
        if let Err(e) = self.ctx.session.put(keys::DEPLOYMENT_READY, &bytes).await {
            warn!(error = %e, "session deployment copy not written");
        }
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("instance", &self.ctx.instance)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

fn list_mut(document: &mut Document, list: ItemList) -> Result<&mut Vec<Value>, StoreError> {
    document
        .get_mut(list.section())
        .and_then(|s| s.get_mut(list.field()))
        .and_then(Value::as_array_mut)
        .ok_or_else(|| StoreError::MissingList {
            section: list.section().to_owned(),
            field: list.field().to_owned(),
        })
}

/// Clear inline `data:` images longer than `limit` inside item lists.
/// Returns the number of cleared fields.
fn compact(document: &mut Document, limit: usize) -> usize {
    let mut cleared = 0usize;
    for list in ItemList::ALL {
        let Ok(items) = list_mut(document, list) else {
            continue;
        };
        for item in items.iter_mut() {
            let id = item_id(item);
            let Value::Object(fields) = item else {
                continue;
            };
            for (field, value) in fields.iter_mut() {
                let oversized = value
                    .as_str()
                    .is_some_and(|s| s.starts_with("data:") && s.len() > limit);
                if oversized {
                    warn!(%list, ?id, field = %field, "cleared oversized inline image");
                    *value = Value::String(String::new());
                    cleared = cleared.saturating_add(1);
                }
            }
        }
    }
    cleared
}

fn iso_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
