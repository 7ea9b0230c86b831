//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

const LEGACY_MIGRATED_KEY: &str = "legacy_migrated";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid admin id: {0}")]
    InvalidAdminId(String),
    #[error("connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
///
/// Targets and downtime state are read and written as whole collections;
/// callers own the critical section around a load-modify-save sequence.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Targets ---

    /// List all targets in sorted order.
    pub fn list_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT url FROM sites ORDER BY url")?;
        let targets = stmt
            .query_map([], |row| row.get::<_, String>(0).map(Target::from_stored))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Replace the whole target set. Duplicates collapse to one row.
    pub fn replace_targets(&self, targets: &[Target]) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM sites", [])?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO sites (url) VALUES (?1)")?;
            for target in targets {
                let url = target.as_str().trim();
                if !url.is_empty() {
                    stmt.execute(params![url])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    // --- Downtime state ---

    /// Load the downtime state of every target that has a row.
    pub fn get_state(&self) -> Result<HashMap<Target, DownState>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT site, down_since FROM status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut state = HashMap::with_capacity(rows.len());
        for (site, down_since) in rows {
            let down_since = match down_since {
                Some(raw) => {
                    let parsed = parse_db_time(&raw);
                    if parsed.is_none() {
                        tracing::warn!("Ignoring unparseable down_since {:?} for {}", raw, site);
                    }
                    parsed
                }
                None => None,
            };
            state.insert(Target::from_stored(site), DownState { down_since });
        }
        Ok(state)
    }

    /// Replace the whole state mapping in one transaction.
    pub fn replace_state(&self, state: &HashMap<Target, DownState>) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM status", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO status (site, down_since) VALUES (?1, ?2)")?;
            for (target, down) in state {
                stmt.execute(params![target.as_str(), down.down_since.map(format_db_time)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // --- Event log ---

    /// Append one serialized event to the log table.
    pub fn append_event(&self, data: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO logs (data) VALUES (?1)", params![data])?;
        Ok(())
    }

    pub fn count_events(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM logs", [], |r| r.get(0))?)
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, limit: i64) -> Result<Vec<String>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM logs ORDER BY rowid DESC LIMIT ?1")?;
        let events = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(events)
    }

    // --- Admins ---

    pub fn list_admins(&self) -> Result<Vec<String>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM admins ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(|id| id.to_string()))
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn is_admin(&self, id: &str) -> Result<bool, DbError> {
        let id = parse_admin_id(id)?;
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT id FROM admins WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn add_admin(&self, id: &str) -> Result<(), DbError> {
        let id = parse_admin_id(id)?;
        let conn = self.conn()?;
        conn.execute("INSERT OR IGNORE INTO admins (id) VALUES (?1)", params![id])?;
        Ok(())
    }

    pub fn remove_admin(&self, id: &str) -> Result<(), DbError> {
        let id = parse_admin_id(id)?;
        let conn = self.conn()?;
        conn.execute("DELETE FROM admins WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Insert configured admin identities that are not present yet.
    /// Non-numeric entries are skipped.
    pub fn seed_admins(&self, ids: &[String]) -> Result<(), DbError> {
        for id in ids {
            match self.add_admin(id) {
                Err(DbError::InvalidAdminId(bad)) => {
                    tracing::warn!("Skipping configured admin id {:?}", bad);
                }
                other => other?,
            }
        }
        Ok(())
    }

    // --- Legacy import ---

    /// Import legacy flat files into empty tables, at most once per database.
    ///
    /// The `legacy_migrated` flag in `meta` is written in the same transaction
    /// as the imported rows, so a restart never repeats the import.
    pub fn import_legacy(&self, files: &LegacyFiles) -> Result<ImportSummary, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let migrated: Option<String> = tx
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![LEGACY_MIGRATED_KEY],
                |r| r.get(0),
            )
            .optional()?;
        if migrated.is_some() {
            return Ok(ImportSummary::default());
        }

        let mut summary = ImportSummary {
            ran: true,
            ..Default::default()
        };

        let sites_count: i64 = tx.query_row("SELECT COUNT(*) FROM sites", [], |r| r.get(0))?;
        if sites_count == 0 {
            if let Some(urls) = read_legacy_sites(&files.sites) {
                let mut stmt = tx.prepare("INSERT OR IGNORE INTO sites (url) VALUES (?1)")?;
                for url in urls {
                    summary.targets += stmt.execute(params![url])?;
                }
            }
        }

        let status_count: i64 = tx.query_row("SELECT COUNT(*) FROM status", [], |r| r.get(0))?;
        if status_count == 0 {
            if let Some(entries) = read_legacy_status(&files.status) {
                let mut stmt =
                    tx.prepare("INSERT OR IGNORE INTO status (site, down_since) VALUES (?1, ?2)")?;
                for (site, down_since) in entries {
                    summary.states += stmt.execute(params![site, down_since.map(format_db_time)])?;
                }
            }
        }

        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)",
            params![LEGACY_MIGRATED_KEY, format_db_time(Utc::now())],
        )?;
        tx.commit()?;

        Ok(summary)
    }
}

fn parse_admin_id(id: &str) -> Result<i64, DbError> {
    id.trim()
        .parse::<i64>()
        .map_err(|_| DbError::InvalidAdminId(id.to_string()))
}

/// Non-blank trimmed lines of the legacy target list, deduplicated.
fn read_legacy_sites(path: &Path) -> Option<BTreeSet<String>> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            if path.exists() {
                tracing::warn!("Failed to read legacy sites file {}: {}", path.display(), e);
            }
            return None;
        }
    };

    Some(
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Entries of the legacy status object. Malformed JSON yields no entries.
fn read_legacy_status(path: &Path) -> Option<Vec<(String, Option<DateTime<Utc>>)>> {
    let text = fs::read_to_string(path).ok()?;

    let data: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&text) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("Legacy status file {} is malformed, importing nothing: {}", path.display(), e);
            serde_json::Map::new()
        }
    };

    Some(
        data.into_iter()
            .map(|(site, entry)| {
                let raw = entry.get("down_since").and_then(|v| v.as_str());
                let down_since = raw.and_then(parse_db_time);
                if raw.is_some() && down_since.is_none() {
                    tracing::warn!("Unparseable down_since for {}, importing as up", site);
                }
                (site, down_since)
            })
            .collect(),
    )
}

pub(crate) fn format_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string from the database.
///
/// Naive values written by older deployments are taken to be UTC.
pub(crate) fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}
