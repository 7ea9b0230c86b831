//! Structured event log.
//!
//! Every probe outcome and alert decision becomes one JSON line, emitted on
//! the [`EVENT_TARGET`] tracing target (the binary routes it to a size-capped
//! file) and appended to the store's log table.

use crate::db::Store;

use chrono::{DateTime, Utc};
use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Tracing target carrying event lines.
pub const EVENT_TARGET: &str = "sitewatch::events";

/// Size at which the event log file is rolled over.
pub const EVENT_LOG_MAX_BYTES: u64 = 1_000_000;
/// Rolled-over files kept next to the live one (`<file>.1` .. `<file>.3`).
pub const EVENT_LOG_BACKUPS: usize = 3;

/// Open the event log file, rolling it over once it reaches
/// [`EVENT_LOG_MAX_BYTES`] and keeping [`EVENT_LOG_BACKUPS`] old files.
pub fn event_log_writer(path: &Path) -> io::Result<BasicRollingFileAppender> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    BasicRollingFileAppender::new(
        path,
        RollingConditionBasic::new().max_size(EVENT_LOG_MAX_BYTES),
        EVENT_LOG_BACKUPS,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SslStatus {
    Valid,
    Error,
}

/// A monitoring event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SiteCheck {
        target: String,
        status: SiteStatus,
        available: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_min: Option<i64>,
    },
    SiteCheckError {
        target: String,
        error: String,
    },
    SslCheck {
        target: String,
        status: SslStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        days_left: Option<i64>,
    },
    SslAlert {
        target: String,
        days_left: i64,
    },
}

impl Event {
    pub fn site_up(target: &str) -> Self {
        Event::SiteCheck {
            target: target.to_string(),
            status: SiteStatus::Up,
            available: 1,
            duration_min: None,
        }
    }

    pub fn site_down(target: &str, duration_min: Option<i64>) -> Self {
        Event::SiteCheck {
            target: target.to_string(),
            status: SiteStatus::Down,
            available: 0,
            duration_min,
        }
    }
}

#[derive(Serialize)]
struct EventRecord<'a> {
    #[serde(flatten)]
    event: &'a Event,
    timestamp: String,
}

/// Writes events to the log file and the store. Never fails.
#[derive(Clone)]
pub struct EventLogger {
    store: Arc<Store>,
}

impl EventLogger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn record(&self, event: Event) {
        self.record_at(event, Utc::now());
    }

    pub fn record_at(&self, event: Event, at: DateTime<Utc>) {
        let line = match render(&event, at) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize event {:?}: {}", event, e);
                return;
            }
        };

        tracing::info!(target: EVENT_TARGET, "{}", line);

        if let Err(e) = self.store.append_event(&line) {
            tracing::warn!("Failed to persist event: {}", e);
        }
    }
}

fn render(event: &Event, at: DateTime<Utc>) -> serde_json::Result<String> {
    serde_json::to_string(&EventRecord {
        event,
        timestamp: at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
    })
}
