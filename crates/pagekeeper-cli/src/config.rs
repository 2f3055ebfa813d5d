//! CLI configuration.
//!
//! Loads settings from `PAGEKEEPER_*` environment variables with sensible
//! defaults. Command-line flags override the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default capacity of the store, matching a browser's local storage quota.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Which storage backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StorageKind {
    /// In-memory. Nothing outlives the process.
    Memory,
    /// Redb file at `storage_path`.
    Redb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub storage: StorageKind,
    pub storage_path: PathBuf,
    /// Capacity enforced on top of the backend.
    pub quota_bytes: usize,
    /// Log filter (e.g., `warn`, `pagekeeper_core=debug`).
    pub log_level: String,
    pub log_format: LogFormat,
    /// Settings reconciliation period of `watch`.
    pub heartbeat: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::Redb,
            storage_path: PathBuf::from("./pagekeeper.redb"),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            log_level: "warn".to_owned(),
            log_format: LogFormat::Text,
            heartbeat: Duration::from_secs(30),
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PAGEKEEPER_STORAGE`: `memory` or `redb` (default: `redb`)
    /// - `PAGEKEEPER_STORAGE_PATH`: redb file (default: `./pagekeeper.redb`)
    /// - `PAGEKEEPER_STORAGE_QUOTA`: capacity in bytes (default: 5 MiB)
    /// - `PAGEKEEPER_LOG_LEVEL`: log filter (default: `warn`)
    /// - `PAGEKEEPER_LOG_FORMAT`: `text` or `json` (default: `text`)
    /// - `PAGEKEEPER_HEARTBEAT_SECS`: heartbeat of `watch` (default: `30`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`. Unparseable values fall back to
    /// the default.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let storage = match lookup("PAGEKEEPER_STORAGE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "memory" | "mem" => StorageKind::Memory,
            _ => StorageKind::Redb,
        };

        let storage_path = lookup("PAGEKEEPER_STORAGE_PATH")
            .filter(|p| !p.is_empty())
            .map_or(defaults.storage_path, PathBuf::from);

        let quota_bytes = lookup("PAGEKEEPER_STORAGE_QUOTA")
            .and_then(|v| v.trim().parse().ok())
            .filter(|&q: &usize| q > 0)
            .unwrap_or(defaults.quota_bytes);

        let log_level = lookup("PAGEKEEPER_LOG_LEVEL")
            .filter(|l| !l.is_empty())
            .unwrap_or(defaults.log_level);

        let log_format = match lookup("PAGEKEEPER_LOG_FORMAT").as_deref() {
            Some("json" | "JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let heartbeat = lookup("PAGEKEEPER_HEARTBEAT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&s| s > 0)
            .map_or(defaults.heartbeat, Duration::from_secs);

        Self {
            storage,
            storage_path,
            quota_bytes,
            log_level,
            log_format,
            heartbeat,
        }
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, storage: Option<StorageKind>, path: Option<PathBuf>) -> Self {
        if let Some(storage) = storage {
            self.storage = storage;
        }
        if let Some(path) = path {
            self.storage_path = path;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = CliConfig::from_lookup(lookup(&[]));
        assert_eq!(config.storage, StorageKind::Redb);
        assert_eq!(config.storage_path, PathBuf::from("./pagekeeper.redb"));
        assert_eq!(config.quota_bytes, DEFAULT_QUOTA_BYTES);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.heartbeat, Duration::from_secs(30));
    }

    #[test]
    fn reads_every_variable() {
        let config = CliConfig::from_lookup(lookup(&[
            ("PAGEKEEPER_STORAGE", "MEMORY"),
            ("PAGEKEEPER_STORAGE_PATH", "/tmp/site.redb"),
            ("PAGEKEEPER_STORAGE_QUOTA", "1024"),
            ("PAGEKEEPER_LOG_LEVEL", "debug"),
            ("PAGEKEEPER_LOG_FORMAT", "json"),
            ("PAGEKEEPER_HEARTBEAT_SECS", "5"),
        ]));
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/site.redb"));
        assert_eq!(config.quota_bytes, 1024);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.heartbeat, Duration::from_secs(5));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = CliConfig::from_lookup(lookup(&[
            ("PAGEKEEPER_STORAGE_QUOTA", "lots"),
            ("PAGEKEEPER_HEARTBEAT_SECS", "0"),
        ]));
        assert_eq!(config.quota_bytes, DEFAULT_QUOTA_BYTES);
        assert_eq!(config.heartbeat, Duration::from_secs(30));
    }

    #[test]
    fn flags_override_environment() {
        let config = CliConfig::from_lookup(lookup(&[("PAGEKEEPER_STORAGE", "memory")]))
            .with_overrides(Some(StorageKind::Redb), Some(PathBuf::from("x.redb")));
        assert_eq!(config.storage, StorageKind::Redb);
        assert_eq!(config.storage_path, PathBuf::from("x.redb"));
    }
}
