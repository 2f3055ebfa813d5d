//! Two sites over the same storage and bus, like two tabs of one browser.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use pagekeeper_core::clock::ManualClock;
use pagekeeper_core::content::{ItemList, sections};
use pagekeeper_core::document::Document;
use pagekeeper_core::error::StoreError;
use pagekeeper_core::keys;
use pagekeeper_core::site::{Site, SiteOptions, StoreContext};
use pagekeeper_core::sync::{SyncHandle, SyncOptions, SyncService};
use pagekeeper_storage::{MemoryBackend, QuotaBackend, StorageBackend};
use serde_json::{Map, Value, json};

const START: i64 = 1_718_000_000_000;

fn fast_sync() -> SyncOptions {
    SyncOptions {
        debounce: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(200),
        backup_interval: Duration::from_secs(3600),
        stale_after: Duration::from_secs(300),
    }
}

async fn two_sites() -> (Arc<Site>, Arc<Site>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let ctx = StoreContext::new(Arc::new(MemoryBackend::new()), clock.clone());
    let sibling = ctx.sibling();
    let a = Site::open(ctx, SiteOptions::default()).await;
    let b = Site::open(sibling, SiteOptions::default()).await;
    (a, b, clock)
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn banner_title(doc: &Document) -> Option<String> {
    doc.get(sections::TOP_BANNER)?
        .get("title")?
        .as_str()
        .map(str::to_owned)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn start(site: &Arc<Site>) -> SyncHandle {
    SyncService::spawn(Arc::clone(site), fast_sync())
}

#[tokio::test]
async fn content_change_reaches_sibling() {
    let (a, b, _) = two_sites().await;
    let handle = start(&b).await;

    a.content()
        .update_section(sections::TOP_BANNER, json!({"title": "Spring sale"}))
        .await
        .unwrap();

    let b2 = Arc::clone(&b);
    assert!(
        eventually(move || {
            let b = Arc::clone(&b2);
            async move { banner_title(&b.content().document().await).as_deref() == Some("Spring sale") }
        })
        .await
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn sibling_subscriber_receives_merged_document() {
    let (a, b, _) = two_sites().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = b.content().subscribe(move |doc| {
        let _ = tx.send(doc.clone());
    });
    let handle = start(&b).await;

    a.content()
        .update_section(sections::FOOTER, json!({"copyright": "2024 Northwind"}))
        .await
        .unwrap();

    let doc = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.get(sections::FOOTER).unwrap()["copyright"], "2024 Northwind");
    // Untouched sections are still present after the re-read.
    assert!(doc.get(sections::DOCTORS).is_some());
    handle.shutdown().await;
}

#[tokio::test]
async fn settings_change_reaches_sibling() {
    let (a, b, clock) = two_sites().await;
    let handle = start(&b).await;

    clock.advance(10);
    a.config()
        .update_config(object(json!({"siteName": "Northwind Offers"})))
        .await
        .unwrap();

    let b2 = Arc::clone(&b);
    assert!(
        eventually(move || {
            let b = Arc::clone(&b2);
            async move { b.config().current().await.site_name == "Northwind Offers" }
        })
        .await
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn concurrent_settings_writes_converge() {
    let (a, b, _) = two_sites().await;
    let handle_a = start(&a).await;
    let handle_b = start(&b).await;

    // Same clock reading on both sides; both stamps collide.
    a.config()
        .update_config(object(json!({"siteName": "from a"})))
        .await
        .unwrap();
    b.config()
        .update_config(object(json!({"siteName": "from b"})))
        .await
        .unwrap();

    let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
    assert!(
        eventually(move || {
            let (a, b) = (Arc::clone(&a2), Arc::clone(&b2));
            async move { a.config().current().await == b.config().current().await }
        })
        .await
    );
    handle_a.shutdown().await;
    handle_b.shutdown().await;
}

#[tokio::test]
async fn item_ids_stay_unique_across_siblings() {
    let (a, b, _) = two_sites().await;
    let handle = start(&b).await;

    let id = a
        .content()
        .insert_item(ItemList::Faq, json!({"question": "Q", "answer": "A"}))
        .await
        .unwrap();

    let b2 = Arc::clone(&b);
    assert!(
        eventually(move || {
            let b = Arc::clone(&b2);
            async move { b.content().items(ItemList::Faq).await.len() == 3 }
        })
        .await
    );
    let next = b
        .content()
        .insert_item(ItemList::Faq, json!({"question": "Q2", "answer": "A2"}))
        .await
        .unwrap();
    assert!(next > id);
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_clears_auto_sync_flag() {
    let (a, _, _) = two_sites().await;
    let handle = start(&a).await;
    assert!(a.config().stats().await.auto_sync_enabled);
    handle.shutdown().await;
    assert!(!a.config().stats().await.auto_sync_enabled);
}

#[tokio::test]
async fn storage_pressure_frees_snapshots_first() {
    let clock = Arc::new(ManualClock::new(START));
    let quota = QuotaBackend::wrap(Arc::new(MemoryBackend::new()), 256 * 1024)
        .await
        .unwrap();
    let storage: Arc<dyn StorageBackend> = Arc::new(quota);
    for i in 0..3 {
        storage
            .put(&keys::config_snapshot(START - i), &vec![b' '; 60 * 1024])
            .await
            .unwrap();
    }
    let site = Site::open(StoreContext::new(Arc::clone(&storage), clock), SiteOptions::default()).await;

    let filler = "x".repeat(100 * 1024);
    site.content()
        .update_section(sections::FOOTER, json!({"disclaimer": filler}))
        .await
        .unwrap();

    assert!(!site.content().has_unsaved_changes().await);
    assert!(site.config().list_snapshots().await.unwrap().is_empty());
    assert!(storage.exists(keys::CONTENT).await.unwrap());
}

#[tokio::test]
async fn storage_exhaustion_keeps_the_edit_in_memory() {
    let clock = Arc::new(ManualClock::new(START));
    let quota = QuotaBackend::wrap(Arc::new(MemoryBackend::new()), 32 * 1024)
        .await
        .unwrap();
    let site = Site::open(StoreContext::new(Arc::new(quota), clock), SiteOptions::default()).await;

    let filler = "x".repeat(64 * 1024);
    let err = site
        .content()
        .update_section(sections::FOOTER, json!({"disclaimer": filler.clone()}))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::StorageExhausted { .. }));
    assert!(site.content().has_unsaved_changes().await);
    let doc = site.content().document().await;
    assert_eq!(doc.get(sections::FOOTER).unwrap()["disclaimer"], filler.as_str());
}
