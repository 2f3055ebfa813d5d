//! Change notification for document stores.
//!
//! A [`Notifier`] fans a committed document out to three kinds of consumer:
//!
//! - synchronous listeners registered with [`Notifier::subscribe`], called in
//!   registration order on the writing task;
//! - a `watch` channel holding the latest document, for consumers that only
//!   care about the current value (the read-hook contract of a UI);
//! - a `broadcast` channel of [`Change`] events for same-process observers
//!   that want every change and its kind.
//!
//! A panicking listener is logged and skipped; it never prevents the other
//! listeners from running.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{broadcast, watch};

/// Capacity of the change event channel.
const EVENT_CAPACITY: usize = 64;

/// What kind of commit produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Sections or fields were updated.
    Updated,
    /// The document was reset to its defaults.
    Reset,
    /// The document was replaced by an import.
    Imported,
    /// A newer copy was adopted from storage.
    Reloaded,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Updated => "updated",
            Self::Reset => "reset",
            Self::Imported => "imported",
            Self::Reloaded => "reloaded",
        };
        f.write_str(name)
    }
}

/// A committed change, as seen by event subscribers.
#[derive(Debug)]
pub struct Change<T> {
    pub kind: ChangeKind,
    pub document: Arc<T>,
}

impl<T> Clone for Change<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            document: Arc::clone(&self.document),
        }
    }
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
}

impl<T> Registry<T> {
    fn remove(&self, id: u64) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}

/// Listener registry plus the watch and event channels of one store.
pub struct Notifier<T> {
    registry: Arc<Registry<T>>,
    current: watch::Sender<Arc<T>>,
    events: broadcast::Sender<Change<T>>,
}

impl<T: Send + Sync + 'static> Notifier<T> {
    /// Create a notifier whose watch channel starts at `initial`.
    #[must_use]
    pub fn new(initial: Arc<T>) -> Self {
        let (current, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
            }),
            current,
            events,
        }
    }

    /// Register a listener that receives every committed document.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription {
            id,
            cancel: Some(Box::new(move || {
                registry.upgrade().is_some_and(|r| r.remove(id))
            })),
        }
    }

    /// Receiver that always holds the latest committed document.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<T>> {
        self.current.subscribe()
    }

    /// Receiver of every change committed after this call.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<Change<T>> {
        self.events.subscribe()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver a committed document: listeners first, then the watch and
    /// event channels.
    pub fn notify(&self, kind: ChangeKind, document: Arc<T>) {
        // Snapshot so listeners may subscribe or unsubscribe while running.
        let listeners: Vec<(u64, Listener<T>)> = self
            .registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in &listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(&document)));
            if outcome.is_err() {
                tracing::error!(listener = id, %kind, "change listener panicked");
            }
        }
        tracing::debug!(listeners = listeners.len(), %kind, "listeners notified");

        self.current.send_replace(Arc::clone(&document));
        // No receivers is not an error.
        let _ = self.events.send(Change { kind, document });
    }
}

impl<T> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field(
                "listeners",
                &self
                    .registry
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .finish_non_exhaustive()
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle removes the listener. Call [`Subscription::detach`] to
/// keep the listener registered for the life of the store.
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
    id: u64,
    cancel: Option<Box<dyn FnOnce() -> bool + Send + Sync>>,
}

impl Subscription {
    /// Listener id, unique within its store.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.cancel.take().is_some_and(|cancel| cancel())
    }

    /// Keep the listener registered after this handle is dropped.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&String) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move |_: &String| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn listeners_receive_every_notification() {
        let notifier = Notifier::new(Arc::new(String::from("a")));
        let (hits, listener) = counter();
        let _sub = notifier.subscribe(listener);

        notifier.notify(ChangeKind::Updated, Arc::new("b".into()));
        notifier.notify(ChangeKind::Updated, Arc::new("c".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let notifier = Notifier::new(Arc::new(String::new()));
        let (hits, listener) = counter();
        let sub = notifier.subscribe(listener);
        assert_eq!(notifier.listener_count(), 1);
        drop(sub);
        assert_eq!(notifier.listener_count(), 0);

        notifier.notify(ChangeKind::Updated, Arc::new("x".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_reports_whether_listener_was_present() {
        let notifier = Notifier::new(Arc::new(String::new()));
        let sub = notifier.subscribe(|_| {});
        assert!(sub.unsubscribe());
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn detached_listener_stays_registered() {
        let notifier = Notifier::new(Arc::new(String::new()));
        let (hits, listener) = counter();
        notifier.subscribe(listener).detach();

        notifier.notify(ChangeKind::Reset, Arc::new("x".into()));
        assert_eq!(notifier.listener_count(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let notifier = Notifier::new(Arc::new(String::new()));
        let _bad = notifier.subscribe(|_| {
            let empty: Vec<u8> = Vec::new();
            let _ = empty[1];
        });
        let (hits, listener) = counter();
        let _good = notifier.subscribe(listener);

        notifier.notify(ChangeKind::Updated, Arc::new("x".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_sees_committed_value() {
        let notifier = Notifier::new(Arc::new(String::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = notifier.subscribe(move |doc: &String| s.lock().unwrap().push(doc.clone()));

        notifier.notify(ChangeKind::Updated, Arc::new("first".into()));
        assert_eq!(*seen.lock().unwrap(), vec!["first".to_owned()]);
    }

    #[tokio::test]
    async fn watch_and_events_follow_listeners() {
        let notifier = Notifier::new(Arc::new(String::from("init")));
        let watch = notifier.watch();
        let mut events = notifier.events();
        assert_eq!(**watch.borrow(), "init");

        notifier.notify(ChangeKind::Imported, Arc::new("next".into()));

        assert_eq!(**watch.borrow(), "next");
        let change = events.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Imported);
        assert_eq!(*change.document, "next");
    }
}
