//! Database model types.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

/// Reasons a candidate target string is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// A monitored URL, identified by its exact string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Validate an operator-supplied URL.
    ///
    /// Accepts `http`/`https` URLs whose host is made of dot-separated labels,
    /// optionally followed by a port or path.
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        static URL_RE: OnceLock<Regex> = OnceLock::new();
        let re = URL_RE.get_or_init(|| {
            Regex::new(r"^https?://(?:[A-Za-z0-9-]+\.)+[A-Za-z0-9-]+(?:[:/].*)?$").unwrap()
        });

        let raw = raw.trim();
        if raw.is_empty() || !re.is_match(raw) {
            return Err(TargetError::InvalidUrl(raw.to_string()));
        }

        let url = Url::parse(raw).map_err(|_| TargetError::InvalidUrl(raw.to_string()))?;
        let has_host = url.host_str().is_some_and(|h| !h.is_empty());
        if !matches!(url.scheme(), "http" | "https") || !has_host {
            return Err(TargetError::InvalidUrl(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    /// Wrap a value read back from storage without re-validating it.
    ///
    /// Legacy imports may carry rows that never went through [`Target::parse`].
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn url(&self) -> Option<Url> {
        Url::parse(&self.0).ok()
    }

    /// Host name of the target, if the stored string parses as a URL.
    pub fn host(&self) -> Option<String> {
        self.url()
            .and_then(|u| u.host_str().map(str::to_string))
            .filter(|h| !h.is_empty())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last known downtime state of a target.
///
/// `down_since` is `None` while the target is reachable; otherwise it holds
/// the instant the current outage was first observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownState {
    pub down_since: Option<DateTime<Utc>>,
}

impl DownState {
    pub fn up() -> Self {
        Self { down_since: None }
    }

    pub fn down_since(at: DateTime<Utc>) -> Self {
        Self { down_since: Some(at) }
    }

    pub fn is_down(&self) -> bool {
        self.down_since.is_some()
    }
}

/// Flat-file sources imported once into an empty database.
#[derive(Debug, Clone)]
pub struct LegacyFiles {
    /// Newline-delimited list of target URLs
    pub sites: PathBuf,
    /// JSON object of `target -> {"down_since": timestamp | null}`
    pub status: PathBuf,
}

/// Row counts produced by a legacy import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub targets: usize,
    pub states: usize,
    /// False when the persisted migration flag was already set.
    pub ran: bool,
}
