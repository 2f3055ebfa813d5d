//! Cross-instance change propagation.
//!
//! Every store instance sharing a storage backend also shares a [`SyncBus`].
//! After a successful write a store publishes a [`SyncSignal`]: a type tag,
//! a timestamp, and the publishing instance. The signal never carries the
//! document. Receivers treat it as a hint and re-read storage.
//!
//! [`SyncService`] runs the receiving side for one [`Site`] as background
//! tasks: a debounced receiver that coalesces bursts of signals into a single
//! re-read, a heartbeat that reconciles settings periodically, and an optional
//! settings snapshot timer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::site::Site;

/// Capacity of the bus. A receiver that falls further behind re-reads
/// everything.
const BUS_CAPACITY: usize = 128;

/// How long [`SyncHandle::shutdown`] waits for each task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of one store instance (one "tab").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generate an id of the form `instance_<ms>_<9 chars>`.
    #[must_use]
    pub fn generate(now_ms: i64) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("instance_{now_ms}_{}", &random[..9]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    ContentUpdated,
    ConfigUpdated,
    ConfigReset,
    ConfigImported,
    Heartbeat,
}

impl SignalKind {
    /// Whether receivers should re-read the content document.
    #[must_use]
    pub fn touches_content(self) -> bool {
        matches!(self, Self::ContentUpdated)
    }

    /// Whether receivers should reconcile the settings document.
    #[must_use]
    pub fn touches_config(self) -> bool {
        !self.touches_content()
    }
}

/// A "something changed, go re-check" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSignal {
    pub kind: SignalKind,
    /// Publish time, epoch milliseconds.
    pub timestamp: i64,
    pub source: InstanceId,
}

impl SyncSignal {
    #[must_use]
    pub fn new(kind: SignalKind, timestamp: i64, source: InstanceId) -> Self {
        Self {
            kind,
            timestamp,
            source,
        }
    }
}

/// A named in-process broadcast channel shared by all instances of a site.
///
/// Clones share the same channel.
#[derive(Clone)]
pub struct SyncBus {
    name: Arc<str>,
    sender: broadcast::Sender<SyncSignal>,
}

impl SyncBus {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            name: Arc::from(name),
            sender,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a signal. Returns the number of receivers it reached.
    pub fn publish(&self, signal: SyncSignal) -> usize {
        let kind = signal.kind;
        let reached = self.sender.send(signal).unwrap_or(0);
        debug!(bus = %self.name, ?kind, reached, "sync signal published");
        reached
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncSignal> {
        self.sender.subscribe()
    }
}

impl fmt::Debug for SyncBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncBus")
            .field("name", &self.name)
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

/// Timing of the background sync tasks.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Quiet period after a signal before re-reading.
    pub debounce: Duration,
    /// Period of the settings reconciliation heartbeat.
    pub heartbeat_interval: Duration,
    /// Period of settings snapshots while `backupEnabled` is set.
    pub backup_interval: Duration,
    /// Signals older than this are ignored.
    pub stale_after: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            backup_interval: Duration::from_secs(30 * 60),
            stale_after: Duration::from_secs(5 * 60),
        }
    }
}

/// Which documents a batch of signals asks us to re-read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Pending {
    content: bool,
    config: bool,
}

impl Pending {
    fn everything() -> Self {
        Self {
            content: true,
            config: true,
        }
    }

    fn any(self) -> bool {
        self.content || self.config
    }

    fn note(&mut self, signal: &SyncSignal, own: &InstanceId, now_ms: i64, stale_after: Duration) {
        if &signal.source == own {
            return;
        }
        let age = now_ms.saturating_sub(signal.timestamp);
        if age > i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX) {
            debug!(source = %signal.source, age_ms = age, "ignoring stale sync signal");
            return;
        }
        self.content |= signal.kind.touches_content();
        self.config |= signal.kind.touches_config();
    }
}

/// Background receiver, heartbeat, and snapshot tasks for one site.
pub struct SyncService;

impl SyncService {
    /// Start the sync tasks. They run until [`SyncHandle::shutdown`] is
    /// called or the handle is dropped.
    #[must_use]
    pub fn spawn(site: Arc<Site>, options: SyncOptions) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Subscribe before spawning so no signal published after `spawn`
        // returns is missed.
        let signals = site.context().bus.subscribe();

        let tasks = vec![
            tokio::spawn(receive_loop(
                Arc::clone(&site),
                options.clone(),
                signals,
                shutdown_rx.clone(),
            )),
            tokio::spawn(heartbeat_loop(
                Arc::clone(&site),
                options.heartbeat_interval,
                shutdown_rx.clone(),
            )),
            tokio::spawn(backup_loop(
                Arc::clone(&site),
                options.backup_interval,
                shutdown_rx,
            )),
        ];

        site.config().set_sync_running(true);
        info!(instance = %site.context().instance, "sync service started");

        SyncHandle {
            site,
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Running sync tasks. Dropping the handle also stops them.
pub struct SyncHandle {
    site: Arc<Site>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "sync task ended abnormally"),
                Err(_) => warn!("sync task did not stop in time"),
            }
        }
        self.site.config().set_sync_running(false);
        info!(instance = %self.site.context().instance, "sync service stopped");
    }
}

impl fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandle")
            .field("instance", &self.site.context().instance)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

async fn receive_loop(
    site: Arc<Site>,
    options: SyncOptions,
    mut signals: broadcast::Receiver<SyncSignal>,
    mut shutdown: watch::Receiver<bool>,
) {
    let own = site.context().instance.clone();

    loop {
        let first = tokio::select! {
            received = signals.recv() => received,
            _ = shutdown.changed() => return,
        };

        let mut pending = Pending::default();
        match first {
            Ok(signal) => pending.note(&signal, &own, site.now_ms(), options.stale_after),
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "sync receiver lagged, re-reading everything");
                pending = Pending::everything();
            }
            Err(RecvError::Closed) => return,
        }
        if !pending.any() {
            continue;
        }

        tokio::select! {
            () = tokio::time::sleep(options.debounce) => {}
            _ = shutdown.changed() => return,
        }

        // Coalesce whatever arrived during the quiet period.
        loop {
            match signals.try_recv() {
                Ok(signal) => pending.note(&signal, &own, site.now_ms(), options.stale_after),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "sync receiver lagged, re-reading everything");
                    pending = Pending::everything();
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        apply(&site, pending).await;
    }
}

async fn apply(site: &Site, pending: Pending) {
    if pending.content {
        let changed = site.content().reload().await;
        debug!(changed, "content re-read after sync signal");
    }
    if pending.config {
        match site.config().sync().await {
            Ok(changed) => debug!(changed, "settings reconciled after sync signal"),
            Err(e) => warn!(error = %e, "settings reconciliation failed"),
        }
    }
}

async fn heartbeat_loop(site: Arc<Site>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = site.config().sync().await {
                    warn!(error = %e, "heartbeat reconciliation failed");
                }
                let ctx = site.context();
                ctx.bus.publish(SyncSignal::new(
                    SignalKind::Heartbeat,
                    site.now_ms(),
                    ctx.instance.clone(),
                ));
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn backup_loop(site: Arc<Site>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !site.config().current().await.backup_enabled {
                    continue;
                }
                match site.config().snapshot().await {
                    Ok(key) => debug!(key, "settings snapshot written"),
                    Err(e) => warn!(error = %e, "settings snapshot failed"),
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn signal(kind: SignalKind, timestamp: i64, source: &str) -> SyncSignal {
        SyncSignal::new(kind, timestamp, InstanceId::from(source.to_owned()))
    }

    #[test]
    fn instance_id_format() {
        let id = InstanceId::generate(1_700_000_000_000);
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "instance");
        assert_eq!(parts[1], "1700000000000");
        assert_eq!(parts[2].len(), 9);
        assert_ne!(id, InstanceId::generate(1_700_000_000_000));
    }

    #[test]
    fn signal_serializes_without_payload() {
        let json = serde_json::to_value(signal(SignalKind::ConfigUpdated, 5, "a")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "CONFIG_UPDATED", "timestamp": 5, "source": "a"})
        );
    }

    #[test]
    fn pending_ignores_own_and_stale_signals() {
        let own = InstanceId::from("me".to_owned());
        let stale = Duration::from_secs(300);
        let mut pending = Pending::default();

        pending.note(&signal(SignalKind::ContentUpdated, 1_000, "me"), &own, 1_000, stale);
        pending.note(&signal(SignalKind::ContentUpdated, 0, "other"), &own, 300_001, stale);
        assert!(!pending.any());

        pending.note(&signal(SignalKind::ContentUpdated, 300_000, "other"), &own, 300_001, stale);
        assert_eq!(pending, Pending { content: true, config: false });
    }

    #[test]
    fn heartbeat_and_config_signals_touch_config() {
        let own = InstanceId::from("me".to_owned());
        let mut pending = Pending::default();
        pending.note(&signal(SignalKind::Heartbeat, 0, "b"), &own, 0, Duration::from_secs(1));
        assert_eq!(pending, Pending { content: false, config: true });
    }

    #[tokio::test]
    async fn bus_clones_share_the_channel() {
        let bus = SyncBus::new("admin-sync");
        let mut rx = bus.clone().subscribe();
        assert_eq!(bus.publish(signal(SignalKind::ConfigReset, 1, "a")), 1);
        assert_eq!(rx.recv().await.unwrap().kind, SignalKind::ConfigReset);
        assert_eq!(bus.name(), "admin-sync");
    }
}
