//! Configuration module for sitewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Telegram bot credential (default: unset)
    pub bot_token: Option<String>,
    /// Destination chat for alerts (default: unset)
    pub chat_id: Option<String>,
    /// Path to the SQLite database file (default: "/app/db.sqlite")
    pub db_path: PathBuf,
    /// Path of the event log; rolled-over files get a numeric suffix
    pub log_file: PathBuf,
    /// Per-probe timeout in seconds (default: 10)
    pub request_timeout: u64,
    /// Identities seeded into the admin table
    pub admin_ids: Vec<String>,
    pub owner_id: Option<String>,
    /// Legacy newline-delimited target list
    pub legacy_sites_file: PathBuf,
    /// Legacy JSON status object
    pub legacy_status_file: PathBuf,
    /// Base URL of the bot API (default: "https://api.telegram.org")
    pub telegram_api_url: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            db_path: PathBuf::from("/app/db.sqlite"),
            log_file: PathBuf::from("/app/logs/monitor.log"),
            request_timeout: 10,
            admin_ids: Vec::new(),
            owner_id: None,
            legacy_sites_file: PathBuf::from("/app/sites.txt"),
            legacy_status_file: PathBuf::from("/app/status.json"),
            telegram_api_url: "https://api.telegram.org".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BOT_TOKEN`, `CHAT_ID`: notification transport and destination
    /// - `DB_FILE`: database path; a directory gets `db.sqlite` appended
    /// - `LOG_FILE`: event log path (default: "/app/logs/monitor.log")
    /// - `REQUEST_TIMEOUT`: probe timeout in seconds (default: 10)
    /// - `ADMIN_IDS`: comma-separated admin identities
    /// - `OWNER_ID`: owner identity, also treated as admin
    /// - `LEGACY_SITES_FILE`, `LEGACY_STATUS_FILE`: first-run import sources
    /// - `TELEGRAM_API_URL`: bot API base URL
    pub fn load() -> Self {
        let mut cfg = Self::default();

        cfg.bot_token = non_empty_var("BOT_TOKEN");
        cfg.chat_id = non_empty_var("CHAT_ID");
        cfg.owner_id = non_empty_var("OWNER_ID");

        if let Some(db_file) = non_empty_var("DB_FILE") {
            cfg.db_path = resolve_db_path(Path::new(&db_file));
        }

        if let Some(log_file) = non_empty_var("LOG_FILE") {
            cfg.log_file = PathBuf::from(log_file);
        }

        if let Ok(timeout_str) = env::var("REQUEST_TIMEOUT") {
            if let Ok(timeout) = timeout_str.trim().parse::<u64>() {
                if timeout > 0 {
                    cfg.request_timeout = timeout;
                }
            }
        }

        if let Ok(ids) = env::var("ADMIN_IDS") {
            cfg.admin_ids = split_ids(&ids);
        }

        if let Some(path) = non_empty_var("LEGACY_SITES_FILE") {
            cfg.legacy_sites_file = PathBuf::from(path);
        }

        if let Some(path) = non_empty_var("LEGACY_STATUS_FILE") {
            cfg.legacy_status_file = PathBuf::from(path);
        }

        if let Some(api) = non_empty_var("TELEGRAM_API_URL") {
            cfg.telegram_api_url = api.trim_end_matches('/').to_string();
        }

        cfg
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Admin identities plus the owner, if any.
    pub fn initial_admins(&self) -> Vec<String> {
        let mut ids = self.admin_ids.clone();
        if let Some(owner) = &self.owner_id {
            if !ids.contains(owner) {
                ids.push(owner.clone());
            }
        }
        ids
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Treat an existing directory, or a new path without an extension, as a
/// directory that should hold `db.sqlite`.
fn resolve_db_path(path: &Path) -> PathBuf {
    if path.is_dir() || (path.extension().is_none() && !path.exists()) {
        path.join("db.sqlite")
    } else {
        path.to_path_buf()
    }
}
