//! The single owner of every store.
//!
//! A [`Site`] is constructed once per process (or once per simulated tab in
//! tests) and handed to consumers as `Arc<Site>`. There are no global
//! instances; two `Site`s opened over the same shared storage and bus behave
//! like two browser tabs of the same origin.

use std::fmt;
use std::sync::Arc;

use pagekeeper_storage::{MemoryBackend, StorageBackend};

use crate::auth::CredentialStore;
use crate::clock::Clock;
use crate::config_store::ConfigStore;
use crate::content_store::{ContentOptions, ContentStore};
use crate::gallery::ImageGallery;
use crate::sync::{InstanceId, SyncBus};
use crate::tracker::VisitorLog;

/// Default name of the sync bus.
pub const DEFAULT_BUS_NAME: &str = "admin-sync";

/// Everything a store needs from its environment.
#[derive(Clone)]
pub struct StoreContext {
    /// Durable storage shared by every instance.
    pub storage: Arc<dyn StorageBackend>,
    /// Storage private to this instance.
    pub session: Arc<dyn StorageBackend>,
    pub clock: Arc<dyn Clock>,
    pub bus: SyncBus,
    pub instance: InstanceId,
}

impl StoreContext {
    /// Context over `storage` with a fresh session, bus, and instance id.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        let instance = InstanceId::generate(clock.now_ms());
        Self {
            storage,
            session: Arc::new(MemoryBackend::new()),
            clock,
            bus: SyncBus::new(DEFAULT_BUS_NAME),
            instance,
        }
    }

    /// Another instance over the same storage, clock, and bus, with its own
    /// session storage and id.
    #[must_use]
    pub fn sibling(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            session: Arc::new(MemoryBackend::new()),
            clock: Arc::clone(&self.clock),
            bus: self.bus.clone(),
            instance: InstanceId::generate(self.clock.now_ms()),
        }
    }

    /// Replace the bus.
    #[must_use]
    pub fn with_bus(mut self, bus: SyncBus) -> Self {
        self.bus = bus;
        self
    }

    /// Replace the session storage.
    #[must_use]
    pub fn with_session(mut self, session: Arc<dyn StorageBackend>) -> Self {
        self.session = session;
        self
    }
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("instance", &self.instance)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Options for [`Site::open`].
#[derive(Debug, Clone, Default)]
pub struct SiteOptions {
    pub content: ContentOptions,
}

/// All stores of one instance.
pub struct Site {
    ctx: StoreContext,
    content: ContentStore,
    config: ConfigStore,
    gallery: ImageGallery,
    credentials: CredentialStore,
    visitors: VisitorLog,
}

impl Site {
    /// Load every store from `ctx`. Missing or malformed stored data falls
    /// back to defaults, so this never fails.
    pub async fn open(ctx: StoreContext, options: SiteOptions) -> Arc<Self> {
        let content = ContentStore::open(ctx.clone(), options.content).await;
        let config = ConfigStore::open(ctx.clone()).await;
        let gallery = ImageGallery::new(ctx.clone());
        let credentials = CredentialStore::open(ctx.clone()).await;
        let visitors = VisitorLog::new(ctx.clone());

        tracing::info!(instance = %ctx.instance, "site opened");
        Arc::new(Self {
            ctx,
            content,
            config,
            gallery,
            credentials,
            visitors,
        })
    }

    #[must_use]
    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    #[must_use]
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    #[must_use]
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    #[must_use]
    pub fn gallery(&self) -> &ImageGallery {
        &self.gallery
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub fn visitors(&self) -> &VisitorLog {
        &self.visitors
    }

    /// Current time from the site clock.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.ctx.clock.now_ms()
    }
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::keys;
    use crate::sync::{SignalKind, SyncSignal};
    use serde_json::{Map, json};

    fn context() -> StoreContext {
        StoreContext::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
    }

    fn heartbeat(ctx: &StoreContext) -> SyncSignal {
        SyncSignal::new(SignalKind::Heartbeat, ctx.clock.now_ms(), ctx.instance.clone())
    }

    #[tokio::test]
    async fn sibling_shares_storage_and_bus_but_not_session() {
        let ctx = context();
        let other = ctx.sibling();
        assert_ne!(ctx.instance, other.instance);

        ctx.storage.put(keys::CONTENT, b"{}").await.unwrap();
        ctx.session.put(keys::CONFIG_SESSION, b"{}").await.unwrap();
        assert!(other.storage.get(keys::CONTENT).await.unwrap().is_some());
        assert!(other.session.get(keys::CONFIG_SESSION).await.unwrap().is_none());

        let mut signals = other.bus.subscribe();
        ctx.bus.publish(heartbeat(&ctx));
        assert_eq!(signals.try_recv().unwrap().source, ctx.instance);
    }

    #[tokio::test]
    async fn separate_bus_isolates_instances() {
        let ctx = context();
        let isolated = ctx.sibling().with_bus(SyncBus::new("preview-sync"));
        let mut signals = isolated.bus.subscribe();

        ctx.bus.publish(heartbeat(&ctx));
        assert!(signals.try_recv().is_err());
        assert_eq!(isolated.bus.name(), "preview-sync");
    }

    #[tokio::test]
    async fn settings_session_copy_lands_in_the_given_session() {
        let session = Arc::new(MemoryBackend::new());
        let ctx = context().with_session(session.clone());
        let site = Site::open(ctx, SiteOptions::default()).await;

        let mut partial = Map::new();
        partial.insert("siteName".to_owned(), json!("Clinic"));
        site.config().update_config(partial).await.unwrap();

        assert!(session.get(keys::CONFIG_SESSION).await.unwrap().is_some());
        assert!(site.context().storage.get(keys::CONFIG_SESSION).await.unwrap().is_none());
        assert!(site.context().storage.get(keys::CONFIG_PRIMARY).await.unwrap().is_some());
    }
}
