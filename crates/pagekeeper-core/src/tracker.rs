//! Simulated visitor analytics.
//!
//! The log is a single JSON object at `tracker/log` holding visitors keyed by
//! id, page views, and click events. Campaign parameters are taken from the
//! query string of the page URL.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TrackerError;
use crate::keys;
use crate::persist;
use crate::site::StoreContext;

/// A visitor counts as active for this long after their last activity.
pub const ACTIVE_WINDOW_MS: i64 = 5 * 60 * 1000;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Campaign parameters of a landing URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtmParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_id: Option<String>,
}

impl UtmParams {
    /// Extract the campaign parameters from a URL's query string. Empty
    /// values are ignored; the first occurrence of a parameter wins.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (name, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            let slot = match name.as_ref() {
                "utm_source" => &mut params.utm_source,
                "utm_medium" => &mut params.utm_medium,
                "utm_campaign" => &mut params.utm_campaign,
                "utm_term" => &mut params.utm_term,
                "utm_content" => &mut params.utm_content,
                "utm_id" => &mut params.utm_id,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub id: String,
    /// First visit, epoch milliseconds.
    pub timestamp: i64,
    pub user_agent: String,
    pub referrer: String,
    pub current_page: String,
    pub utm_params: UtmParams,
    pub session_id: String,
    pub is_active: bool,
    pub last_activity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub id: String,
    pub visitor_id: String,
    pub page: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_on_page: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub id: String,
    pub visitor_id: String,
    pub element: String,
    pub page: String,
    pub timestamp: i64,
    pub utm_params: UtmParams,
}

/// Everything the log holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingLog {
    pub visitors: BTreeMap<String, Visitor>,
    pub page_views: Vec<PageView>,
    pub click_events: Vec<ClickEvent>,
}

/// Counts since midnight UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayStats {
    pub total_visitors: usize,
    pub total_page_views: usize,
    pub total_clicks: usize,
}

/// Parse an absolute URL, or a path relative to the site root.
fn parse_page_url(raw: &str) -> Result<Url, TrackerError> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost/")
            .and_then(|base| base.join(raw))
            .map_err(|e| TrackerError::InvalidUrl {
                url: raw.to_owned(),
                reason: e.to_string(),
            }),
        Err(e) => Err(TrackerError::InvalidUrl {
            url: raw.to_owned(),
            reason: e.to_string(),
        }),
    }
}

fn event_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn start_of_day(now_ms: i64) -> i64 {
    DateTime::<Utc>::from_timestamp_millis(now_ms)
        .and_then(|t| t.date_naive().and_hms_opt(0, 0, 0))
        .map_or(now_ms - now_ms.rem_euclid(MS_PER_DAY), |midnight| {
            midnight.and_utc().timestamp_millis()
        })
}

/// The visitor log of a site.
pub struct VisitorLog {
    ctx: StoreContext,
    /// Serializes read-modify-write cycles on the log.
    write_lock: Mutex<()>,
}

impl VisitorLog {
    #[must_use]
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ctx,
            write_lock: Mutex::new(()),
        }
    }

    /// Record a visitor landing on `url`, along with a page view.
    ///
    /// A returning visitor keeps their first-visit time; campaign parameters
    /// are replaced only when the new URL carries some.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidUrl`] or a store error.
    pub async fn record_visit(
        &self,
        visitor_id: &str,
        url: &str,
        referrer: &str,
        user_agent: &str,
    ) -> Result<Visitor, TrackerError> {
        let url = parse_page_url(url)?;
        let utm = UtmParams::from_url(&url);
        let now = self.ctx.clock.now_ms();

        let _guard = self.write_lock.lock().await;
        let mut log = self.load().await;
        let visitor = log
            .visitors
            .entry(visitor_id.to_owned())
            .and_modify(|v| {
                v.current_page = url.path().to_owned();
                v.last_activity = now;
                v.is_active = true;
                if !utm.is_empty() {
                    v.utm_params = utm.clone();
                }
            })
            .or_insert_with(|| Visitor {
                id: visitor_id.to_owned(),
                timestamp: now,
                user_agent: user_agent.to_owned(),
                referrer: referrer.to_owned(),
                current_page: url.path().to_owned(),
                utm_params: utm.clone(),
                session_id: self.ctx.instance.to_string(),
                is_active: true,
                last_activity: now,
            })
            .clone();
        log.page_views.push(PageView {
            id: event_id(),
            visitor_id: visitor_id.to_owned(),
            page: url.path().to_owned(),
            timestamp: now,
            time_on_page: None,
        });
        self.save(&log).await?;

        info!(visitor = visitor_id, page = %url.path(), campaign = ?visitor.utm_params.utm_campaign, "visit recorded");
        Ok(visitor)
    }

    /// Record a page view by a known or unknown visitor.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidUrl`] or a store error.
    pub async fn record_page_view(&self, visitor_id: &str, url: &str) -> Result<PageView, TrackerError> {
        let url = parse_page_url(url)?;
        let now = self.ctx.clock.now_ms();
        let view = PageView {
            id: event_id(),
            visitor_id: visitor_id.to_owned(),
            page: url.path().to_owned(),
            timestamp: now,
            time_on_page: None,
        };

        let _guard = self.write_lock.lock().await;
        let mut log = self.load().await;
        if let Some(visitor) = log.visitors.get_mut(visitor_id) {
            visitor.current_page = view.page.clone();
            visitor.last_activity = now;
            visitor.is_active = true;
        }
        log.page_views.push(view.clone());
        self.save(&log).await?;
        debug!(visitor = visitor_id, page = %view.page, "page view recorded");
        Ok(view)
    }

    /// Record a click on `element` while on `url`.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidUrl`] or a store error.
    pub async fn record_click(
        &self,
        visitor_id: &str,
        element: &str,
        url: &str,
    ) -> Result<ClickEvent, TrackerError> {
        let url = parse_page_url(url)?;
        let now = self.ctx.clock.now_ms();
        let click = ClickEvent {
            id: event_id(),
            visitor_id: visitor_id.to_owned(),
            element: element.to_owned(),
            page: url.path().to_owned(),
            timestamp: now,
            utm_params: UtmParams::from_url(&url),
        };

        let _guard = self.write_lock.lock().await;
        let mut log = self.load().await;
        if let Some(visitor) = log.visitors.get_mut(visitor_id) {
            visitor.last_activity = now;
            visitor.is_active = true;
        }
        log.click_events.push(click.clone());
        self.save(&log).await?;
        debug!(visitor = visitor_id, element, "click recorded");
        Ok(click)
    }

    /// Refresh a visitor's last activity. Returns `false` for unknown ids.
    ///
    /// # Errors
    ///
    /// A store error if the log cannot be saved.
    pub async fn touch(&self, visitor_id: &str) -> Result<bool, TrackerError> {
        let now = self.ctx.clock.now_ms();
        self.modify_visitor(visitor_id, |v| {
            v.last_activity = now;
            v.is_active = true;
        })
        .await
    }

    /// Mark a visitor as gone. Returns `false` for unknown ids.
    ///
    /// # Errors
    ///
    /// A store error if the log cannot be saved.
    pub async fn mark_inactive(&self, visitor_id: &str) -> Result<bool, TrackerError> {
        self.modify_visitor(visitor_id, |v| v.is_active = false).await
    }

    /// Visitors that are active and were seen within the active window.
    pub async fn active_visitors(&self, now_ms: i64) -> Vec<Visitor> {
        self.load()
            .await
            .visitors
            .into_values()
            .filter(|v| v.is_active && now_ms.saturating_sub(v.last_activity) < ACTIVE_WINDOW_MS)
            .collect()
    }

    /// Counts of visitors, page views, and clicks since midnight UTC.
    pub async fn today_stats(&self, now_ms: i64) -> TodayStats {
        let since = start_of_day(now_ms);
        let log = self.load().await;
        TodayStats {
            total_visitors: log.visitors.values().filter(|v| v.timestamp >= since).count(),
            total_page_views: log.page_views.iter().filter(|p| p.timestamp >= since).count(),
            total_clicks: log.click_events.iter().filter(|c| c.timestamp >= since).count(),
        }
    }

    /// Delete records older than `days`. Returns the number of removed
    /// records.
    ///
    /// # Errors
    ///
    /// A store error if the log cannot be saved.
    pub async fn purge_older_than(&self, days: u32) -> Result<usize, TrackerError> {
        let cutoff = self
            .ctx
            .clock
            .now_ms()
            .saturating_sub(i64::from(days).saturating_mul(MS_PER_DAY));

        let _guard = self.write_lock.lock().await;
        let mut log = self.load().await;
        let before = log.visitors.len() + log.page_views.len() + log.click_events.len();
        log.visitors.retain(|_, v| v.last_activity >= cutoff);
        log.page_views.retain(|p| p.timestamp >= cutoff);
        log.click_events.retain(|c| c.timestamp >= cutoff);
        let removed = before - (log.visitors.len() + log.page_views.len() + log.click_events.len());

        if removed > 0 {
            self.save(&log).await?;
        }
        info!(days, removed, "visitor log purged");
        Ok(removed)
    }

    /// The whole log.
    pub async fn snapshot(&self) -> TrackingLog {
        self.load().await
    }

    async fn modify_visitor<F>(&self, visitor_id: &str, change: F) -> Result<bool, TrackerError>
    where
        F: FnOnce(&mut Visitor),
    {
        let _guard = self.write_lock.lock().await;
        let mut log = self.load().await;
        let Some(visitor) = log.visitors.get_mut(visitor_id) else {
            return Ok(false);
        };
        change(visitor);
        self.save(&log).await?;
        Ok(true)
    }

    async fn load(&self) -> TrackingLog {
        let Some(value) = persist::load_value(&*self.ctx.storage, keys::TRACKER).await else {
            return TrackingLog::default();
        };
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "stored visitor log is malformed, starting empty");
            TrackingLog::default()
        })
    }

    async fn save(&self, log: &TrackingLog) -> Result<(), TrackerError> {
        let bytes = persist::encode(keys::TRACKER, log)?;
        persist::put_with_recovery(&*self.ctx.storage, keys::TRACKER, bytes, || None).await?;
        Ok(())
    }
}

impl fmt::Debug for VisitorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisitorLog")
            .field("instance", &self.ctx.instance)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pagekeeper_storage::{MemoryBackend, StorageBackend};
    use std::sync::Arc;

    // 2024-06-10T12:00:00Z
    const NOON: i64 = 1_718_020_800_000;

    fn log_with_clock() -> (VisitorLog, Arc<ManualClock>, Arc<MemoryBackend>) {
        let clock = Arc::new(ManualClock::new(NOON));
        let storage = Arc::new(MemoryBackend::new());
        let log = VisitorLog::new(StoreContext::new(storage.clone(), clock.clone()));
        (log, clock, storage)
    }

    #[test]
    fn utm_params_are_parsed_from_query() {
        let url = Url::parse(
            "https://example.com/?utm_source=fb&utm_medium=cpc&utm_campaign=spring%20sale&utm_term=&utm_id=42&other=1",
        )
        .unwrap();
        let utm = UtmParams::from_url(&url);
        assert_eq!(utm.utm_source.as_deref(), Some("fb"));
        assert_eq!(utm.utm_medium.as_deref(), Some("cpc"));
        assert_eq!(utm.utm_campaign.as_deref(), Some("spring sale"));
        assert_eq!(utm.utm_term, None);
        assert_eq!(utm.utm_id.as_deref(), Some("42"));
        assert_eq!(utm.utm_content, None);
    }

    #[test]
    fn relative_paths_are_accepted() {
        let url = parse_page_url("/offer?utm_source=mail").unwrap();
        assert_eq!(url.path(), "/offer");
        assert!(parse_page_url("http://[bad").is_err());
    }

    #[test]
    fn start_of_day_is_midnight_utc() {
        assert_eq!(start_of_day(NOON), NOON - 12 * 60 * 60 * 1000);
    }

    #[tokio::test]
    async fn visit_creates_visitor_and_page_view() {
        let (log, _, _) = log_with_clock();
        let visitor = log
            .record_visit("v1", "https://example.com/landing?utm_source=google", "", "test-agent")
            .await
            .unwrap();

        assert_eq!(visitor.current_page, "/landing");
        assert_eq!(visitor.utm_params.utm_source.as_deref(), Some("google"));
        let snapshot = log.snapshot().await;
        assert_eq!(snapshot.visitors.len(), 1);
        assert_eq!(snapshot.page_views.len(), 1);
    }

    #[tokio::test]
    async fn returning_visitor_keeps_first_visit_and_campaign() {
        let (log, clock, _) = log_with_clock();
        log.record_visit("v1", "/a?utm_campaign=x", "", "ua").await.unwrap();
        clock.advance(1_000);
        let visitor = log.record_visit("v1", "/b", "", "ua").await.unwrap();

        assert_eq!(visitor.timestamp, NOON);
        assert_eq!(visitor.last_activity, NOON + 1_000);
        assert_eq!(visitor.current_page, "/b");
        assert_eq!(visitor.utm_params.utm_campaign.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn active_visitors_respect_window_and_flag() {
        let (log, clock, _) = log_with_clock();
        log.record_visit("v1", "/", "", "ua").await.unwrap();
        log.record_visit("v2", "/", "", "ua").await.unwrap();
        log.record_visit("v3", "/", "", "ua").await.unwrap();
        assert!(log.mark_inactive("v2").await.unwrap());

        clock.advance(4 * 60 * 1000);
        assert!(log.touch("v3").await.unwrap());
        assert!(!log.touch("ghost").await.unwrap());

        let now = NOON + ACTIVE_WINDOW_MS + 1;
        let active: Vec<String> = log.active_visitors(now).await.into_iter().map(|v| v.id).collect();
        assert_eq!(active, vec!["v3"]);
    }

    #[tokio::test]
    async fn today_stats_count_since_midnight() {
        let (log, clock, _) = log_with_clock();
        clock.set(NOON - 13 * 60 * 60 * 1000);
        log.record_visit("yesterday", "/", "", "ua").await.unwrap();
        clock.set(NOON);
        log.record_visit("today", "/", "", "ua").await.unwrap();
        log.record_page_view("today", "/faq").await.unwrap();
        log.record_click("today", "cta-button", "/faq?utm_source=x").await.unwrap();

        let stats = log.today_stats(NOON).await;
        assert_eq!(
            stats,
            TodayStats {
                total_visitors: 1,
                total_page_views: 2,
                total_clicks: 1,
            }
        );
    }

    #[tokio::test]
    async fn purge_removes_old_records() {
        let (log, clock, _) = log_with_clock();
        log.record_visit("old", "/", "", "ua").await.unwrap();
        clock.advance(31 * MS_PER_DAY);
        log.record_visit("new", "/", "", "ua").await.unwrap();

        let removed = log.purge_older_than(30).await.unwrap();
        assert_eq!(removed, 2);
        let snapshot = log.snapshot().await;
        assert!(snapshot.visitors.contains_key("new"));
        assert_eq!(snapshot.page_views.len(), 1);
    }

    #[tokio::test]
    async fn malformed_log_reads_as_empty() {
        let (log, _, storage) = log_with_clock();
        storage.put(keys::TRACKER, b"[1,2,3]").await.unwrap();
        assert_eq!(log.snapshot().await, TrackingLog::default());
        log.record_visit("v", "/", "", "ua").await.unwrap();
        assert_eq!(log.snapshot().await.visitors.len(), 1);
    }
}
