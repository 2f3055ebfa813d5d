//! Administrative settings with layered persistence.
//!
//! The settings document is written to three layers: the primary and backup
//! copies in shared storage, and a session copy private to the instance.
//! Loading and [`ConfigStore::sync`] pick the copy with the newest
//! `lastUpdated` stamp (ties prefer primary, then backup, then session).
//!
//! Stamps are `max(now, previous + 1)`, so every write of one instance is
//! strictly newer than its last. A shared layer is only overwritten when the
//! stored copy is not newer than the one being written; an older write never
//! clobbers a newer one, and every instance converges on the newest write
//! once it reconciles.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pagekeeper_storage::StorageBackend;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, warn};

use crate::document::parse_object;
use crate::error::{ImportError, StoreError};
use crate::keys;
use crate::notify::{Change, ChangeKind, Notifier, Subscription};
use crate::persist;
use crate::site::StoreContext;
use crate::sync::{SignalKind, SyncSignal};

/// Number of settings snapshots kept.
pub const SNAPSHOTS_KEPT: usize = 5;

/// A committed settings change.
pub type ConfigEvent = Change<ConfigDocument>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Pt,
    En,
}

/// The administrative settings document.
///
/// Missing fields take their default value; unknown fields are kept in
/// `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigDocument {
    pub site_name: String,
    pub site_url: String,
    pub tracking_enabled: bool,
    pub email_notifications: bool,
    pub slack_webhook: String,
    pub api_key: String,
    /// Days of visitor data to keep.
    #[serde(deserialize_with = "lenient_u32")]
    pub data_retention: u32,
    pub timezone: String,
    pub page_title: String,
    pub page_description: String,
    pub favicon_url: String,
    pub auto_save: bool,
    /// Minutes.
    pub sync_interval: u32,
    pub backup_enabled: bool,
    /// Minutes.
    pub session_timeout: u32,
    pub max_login_attempts: u32,
    pub theme: Theme,
    pub language: Language,
    /// Epoch milliseconds of the last write.
    pub last_updated: i64,
    pub config_version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            site_name: "My Landing Page".to_owned(),
            site_url: String::new(),
            tracking_enabled: true,
            email_notifications: true,
            slack_webhook: String::new(),
            api_key: String::new(),
            data_retention: 90,
            timezone: "America/New_York".to_owned(),
            page_title: "My Landing Page".to_owned(),
            page_description: String::new(),
            favicon_url: "/favicon.ico".to_owned(),
            auto_save: true,
            sync_interval: 5,
            backup_enabled: true,
            session_timeout: 60,
            max_login_attempts: 5,
            theme: Theme::Dark,
            language: Language::Pt,
            last_updated: 0,
            config_version: "1.0.0".to_owned(),
            extra: Map::new(),
        }
    }
}

impl ConfigDocument {
    fn to_map(&self) -> Result<Map<String, Value>, StoreError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::InvalidDocument {
                reason: "settings did not serialize to an object".to_owned(),
            }),
            Err(e) => Err(StoreError::Serialization {
                key: keys::CONFIG_PRIMARY.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    fn from_map(map: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map))
    }
}

/// Accept a number or a numeric string.
fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u32),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Storage layer holding a settings copy, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Primary,
    Backup,
    Session,
}

impl Layer {
    const ALL: [Self; 3] = [Self::Primary, Self::Backup, Self::Session];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Primary => keys::CONFIG_PRIMARY,
            Self::Backup => keys::CONFIG_BACKUP,
            Self::Session => keys::CONFIG_SESSION,
        }
    }

    fn is_shared(self) -> bool {
        !matches!(self, Self::Session)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
            Self::Session => "session",
        })
    }
}

/// Summary for the administrative console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStats {
    pub config_version: String,
    pub last_updated: i64,
    pub listeners_count: usize,
    pub auto_sync_enabled: bool,
    pub backup_enabled: bool,
    pub snapshots: usize,
}

/// Layered administrative settings of one instance.
pub struct ConfigStore {
    ctx: StoreContext,
    state: Mutex<ConfigDocument>,
    notifier: Notifier<ConfigDocument>,
    sync_running: AtomicBool,
}

impl ConfigStore {
    /// Load the newest valid copy across the layers, or the defaults.
    pub async fn open(ctx: StoreContext) -> Self {
        let document = match newest(&ctx).await {
            Some((layer, doc)) => {
                debug!(%layer, last_updated = doc.last_updated, "settings loaded");
                doc
            }
            None => {
                debug!("no stored settings, using defaults");
                ConfigDocument::default()
            }
        };

        Self {
            notifier: Notifier::new(Arc::new(document.clone())),
            state: Mutex::new(document),
            ctx,
            sync_running: AtomicBool::new(false),
        }
    }

    /// A copy of the current settings.
    pub async fn current(&self) -> ConfigDocument {
        self.state.lock().await.clone()
    }

    /// Shallow-merge fields into the settings and commit.
    ///
    /// `lastUpdated` in `partial` is ignored; the store stamps every write.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidDocument`] if a field has the wrong type, or any
    /// storage error from writing the primary layer.
    pub async fn update_config(&self, partial: Map<String, Value>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut map = state.to_map()?;
        for (key, value) in partial {
            if key != "lastUpdated" {
                map.insert(key, value);
            }
        }
        let next = ConfigDocument::from_map(map).map_err(|e| StoreError::InvalidDocument {
            reason: e.to_string(),
        })?;

        self.commit(&mut state, next, ChangeKind::Updated).await?;
        info!(last_updated = state.last_updated, "settings updated");
        Ok(())
    }

    /// Replace the settings and commit.
    ///
    /// # Errors
    ///
    /// Any storage error from writing the primary layer.
    pub async fn set_config(&self, document: ConfigDocument) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.commit(&mut state, document, ChangeKind::Updated).await?;
        info!(last_updated = state.last_updated, "settings replaced");
        Ok(())
    }

    /// Restore the default settings and commit.
    ///
    /// # Errors
    ///
    /// Any storage error from writing the primary layer.
    pub async fn reset_to_default(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.commit(&mut state, ConfigDocument::default(), ChangeKind::Reset)
            .await?;
        info!("settings reset to defaults");
        Ok(())
    }

    /// Pretty-printed JSON of the current settings.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialization`] if encoding fails.
    pub async fn export_config(&self) -> Result<String, StoreError> {
        let state = self.state.lock().await;
        serde_json::to_string_pretty(&*state).map_err(|e| StoreError::Serialization {
            key: keys::CONFIG_PRIMARY.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Replace the settings with `text` merged over the defaults.
    ///
    /// # Errors
    ///
    /// [`ImportError::Parse`] for invalid JSON or mistyped fields,
    /// [`ImportError::NotAnObject`] for non-objects; nothing changes in
    /// either case.
    pub async fn import_config(&self, text: &str) -> Result<(), ImportError> {
        let imported = parse_object(text)?;
        let mut map = ConfigDocument::default().to_map()?;
        map.extend(imported);
        let next = ConfigDocument::from_map(map).map_err(|e| ImportError::Parse {
            reason: e.to_string(),
        })?;

        let mut state = self.state.lock().await;
        self.commit(&mut state, next, ChangeKind::Imported).await?;
        info!(last_updated = state.last_updated, "settings imported");
        Ok(())
    }

    /// Reconcile the stored layers with memory.
    ///
    /// A strictly newer stored copy is adopted and announced to listeners. An
    /// equally stamped but different shared copy is adopted too, so that
    /// instances whose writes collided on a stamp agree. The winner is then
    /// written back to any layer holding an older copy. Returns whether the
    /// in-memory settings changed.
    ///
    /// # Errors
    ///
    /// Any storage error from rewriting the primary layer.
    pub async fn sync(&self) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let mut changed = false;

        if let Some((layer, stored)) = newest(&self.ctx).await {
            let newer = stored.last_updated > state.last_updated;
            let collided =
                stored.last_updated == state.last_updated && layer.is_shared() && stored != *state;
            if newer || collided {
                debug!(%layer, last_updated = stored.last_updated, "adopting stored settings");
                *state = stored;
                self.notifier
                    .notify(ChangeKind::Reloaded, Arc::new(state.clone()));
                changed = true;
            }
        }

        self.save_layers(&state).await?;
        if changed {
            info!(last_updated = state.last_updated, "settings synchronized");
        }
        Ok(changed)
    }

    /// Write the current settings to a new snapshot and prune old ones.
    /// Returns the snapshot key.
    ///
    /// # Errors
    ///
    /// Any storage error from writing the snapshot or listing snapshots.
    pub async fn snapshot(&self) -> Result<String, StoreError> {
        let document = self.current().await;
        let key = keys::config_snapshot(self.ctx.clock.now_ms());
        let bytes = persist::encode(&key, &document)?;
        persist::put_with_recovery(&*self.ctx.storage, &key, bytes, || None).await?;

        let snapshots = self.list_snapshots().await?;
        let excess = snapshots.len().saturating_sub(SNAPSHOTS_KEPT);
        for old in &snapshots[..excess] {
            if let Err(e) = self.ctx.storage.delete(old).await {
                warn!(key = %old, error = %e, "failed to prune settings snapshot");
            }
        }
        info!(key, pruned = excess, "settings snapshot written");
        Ok(key)
    }

    /// Snapshot keys, oldest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] if listing fails.
    pub async fn list_snapshots(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.ctx.storage.list(keys::CONFIG_SNAPSHOTS).await?)
    }

    /// Summary of the settings and the store.
    pub async fn stats(&self) -> ConfigStats {
        let state = self.current().await;
        let snapshots = self.list_snapshots().await.map_or(0, |s| s.len());
        ConfigStats {
            config_version: state.config_version,
            last_updated: state.last_updated,
            listeners_count: self.notifier.listener_count(),
            auto_sync_enabled: self.sync_running.load(Ordering::Relaxed),
            backup_enabled: state.backup_enabled,
            snapshots,
        }
    }

    /// Delete every stored copy and snapshot, then reset to the defaults.
    ///
    /// # Errors
    ///
    /// Any storage error from the deletes or the reset.
    pub async fn clear_all_data(&self) -> Result<(), StoreError> {
        for layer in Layer::ALL {
            self.backend(layer).delete(layer.key()).await?;
        }
        for key in self.list_snapshots().await? {
            self.ctx.storage.delete(&key).await?;
        }
        warn!("all stored settings cleared");
        self.reset_to_default().await
    }

    /// Register a listener that receives every committed document.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConfigDocument) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    /// Receiver that always holds the latest committed settings.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<ConfigDocument>> {
        self.notifier.watch()
    }

    /// Receiver of every settings change committed after this call.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConfigEvent> {
        self.notifier.events()
    }

    pub(crate) fn set_sync_running(&self, running: bool) {
        self.sync_running.store(running, Ordering::Relaxed);
    }

    fn backend(&self, layer: Layer) -> &dyn StorageBackend {
        layer_backend(&self.ctx, layer)
    }

    async fn commit(
        &self,
        state: &mut ConfigDocument,
        mut next: ConfigDocument,
        kind: ChangeKind,
    ) -> Result<(), StoreError> {
        next.last_updated = self
            .ctx
            .clock
            .now_ms()
            .max(state.last_updated.saturating_add(1));
        self.save_layers(&next).await?;
        *state = next;

        self.notifier.notify(kind, Arc::new(state.clone()));
        let signal = match kind {
            ChangeKind::Reset => SignalKind::ConfigReset,
            ChangeKind::Imported => SignalKind::ConfigImported,
            ChangeKind::Updated | ChangeKind::Reloaded => SignalKind::ConfigUpdated,
        };
        self.ctx.bus.publish(SyncSignal::new(
            signal,
            self.ctx.clock.now_ms(),
            self.ctx.instance.clone(),
        ));
        Ok(())
    }

    /// Write `document` to every layer whose stored copy is older.
    ///
    /// Primary failures are returned; backup and session failures are logged.
    async fn save_layers(&self, document: &ConfigDocument) -> Result<(), StoreError> {
        let bytes = persist::encode(keys::CONFIG_PRIMARY, document)?;

        for layer in Layer::ALL {
            let backend = self.backend(layer);
            if let Some(stored) = read_layer(backend, layer.key()).await {
                if stored.last_updated > document.last_updated {
                    debug!(%layer, stored = stored.last_updated, "stored settings are newer, not overwriting");
                    continue;
                }
                if stored == *document {
                    continue;
                }
            }

            let result = persist::put_with_recovery(backend, layer.key(), bytes.clone(), || None).await;
            match (layer, result) {
                (_, Ok(())) => {}
                (Layer::Primary, Err(e)) => return Err(e),
                (_, Err(e)) => warn!(%layer, error = %e, "failed to write settings copy"),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("instance", &self.ctx.instance)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

fn layer_backend(ctx: &StoreContext, layer: Layer) -> &dyn StorageBackend {
    if layer.is_shared() {
        &*ctx.storage
    } else {
        &*ctx.session
    }
}

async fn read_layer(backend: &dyn StorageBackend, key: &str) -> Option<ConfigDocument> {
    let map = persist::load_object(backend, key).await?;
    match ConfigDocument::from_map(map) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!(key, error = %e, "stored settings are malformed, ignoring them");
            None
        }
    }
}

/// The newest valid stored copy. Earlier layers win ties.
async fn newest(ctx: &StoreContext) -> Option<(Layer, ConfigDocument)> {
    let mut best: Option<(Layer, ConfigDocument)> = None;
    for layer in Layer::ALL {
        let Some(candidate) = read_layer(layer_backend(ctx, layer), layer.key()).await else {
            continue;
        };
        let better = best
            .as_ref()
            .is_none_or(|(_, current)| candidate.last_updated > current.last_updated);
        if better {
            best = Some((layer, candidate));
        }
    }
    best
}
