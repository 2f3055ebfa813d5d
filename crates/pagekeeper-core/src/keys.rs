//! Storage key layout.
//!
//! Shared keys live in the durable backend every store instance sees.
//! Session keys live in the per-instance session backend.

/// Serialized content document.
pub const CONTENT: &str = "content/site";
/// Deployment envelope (shared copy). Regenerated on every content write.
pub const DEPLOYMENT_BACKUP: &str = "content/deployment_backup";
/// Deployment envelope (session copy).
pub const DEPLOYMENT_READY: &str = "content/deployment_ready";

/// Primary settings copy.
pub const CONFIG_PRIMARY: &str = "config/primary";
/// Backup settings copy.
pub const CONFIG_BACKUP: &str = "config/backup";
/// Session settings copy.
pub const CONFIG_SESSION: &str = "config/session";
/// Prefix for timestamped settings snapshots.
pub const CONFIG_SNAPSHOTS: &str = "config/snapshots/";

/// Uploaded image list.
pub const GALLERY: &str = "gallery/images";

/// Administrator credential record.
pub const CREDENTIALS: &str = "auth/credentials";
/// Current administrator session.
pub const SESSION: &str = "auth/session";

/// Simulated visitor log.
pub const TRACKER: &str = "tracker/log";

/// Prefix for regenerable cached data.
pub const CACHE: &str = "cache/";

/// Keys (or key prefixes) whose data can be regenerated and may therefore be
/// deleted to free capacity. Nothing else is ever removed by recovery.
pub const DISPOSABLE: &[&str] = &[DEPLOYMENT_BACKUP, CONFIG_SNAPSHOTS, CACHE];

/// Build the key of the settings snapshot taken at `timestamp_ms`.
#[must_use]
pub fn config_snapshot(timestamp_ms: i64) -> String {
    // Zero-padded so lexicographic key order matches time order.
    format!("{CONFIG_SNAPSHOTS}{timestamp_ms:015}")
}
