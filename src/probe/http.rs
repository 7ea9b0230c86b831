//! HTTP probe tiers built on reqwest.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::StatusCode;

use super::ProbeError;

/// Number of GET attempts in the second tier.
pub const GET_ATTEMPTS: usize = 3;

/// Result of the GET tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome {
    Up,
    /// The server answered with something other than 200.
    Rejected(StatusCode),
    /// Every attempt failed at the transport level.
    Unreachable,
}

/// Build the shared probe client: bounded timeout, redirects followed, caches
/// bypassed.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| ProbeError::Config(e.to_string()))
}

/// First tier: a single HEAD request. Up iff the status is exactly 200.
pub async fn run_head_probe(client: &reqwest::Client, url: &str) -> bool {
    match client.head(url).send().await {
        Ok(response) => response.status() == StatusCode::OK,
        Err(e) => {
            tracing::debug!("HEAD {} failed: {}", url, e);
            false
        }
    }
}

/// Second tier: up to [`GET_ATTEMPTS`] GETs, sleeping `retry_delay` after each
/// transport failure except the last. Any HTTP answer ends the tier.
pub async fn run_get_probe(client: &reqwest::Client, url: &str, retry_delay: Duration) -> GetOutcome {
    for attempt in 1..=GET_ATTEMPTS {
        match client.get(url).send().await {
            Ok(response) if response.status() == StatusCode::OK => return GetOutcome::Up,
            Ok(response) => return GetOutcome::Rejected(response.status()),
            Err(e) => {
                tracing::debug!("GET {} attempt {} failed: {}", url, attempt, e);
                if attempt < GET_ATTEMPTS {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    GetOutcome::Unreachable
}
