//! Availability probing.
//!
//! A target is probed in three tiers, each a fallback for the previous one:
//! a HEAD request, up to three GET attempts, and finally a hand-written HEAD
//! over a raw TCP (or TLS) connection to every resolved address.

mod http;
mod raw;

pub use http::*;
pub use raw::*;

use crate::db::Target;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Decides whether a target is reachable.
///
/// `Ok(false)` is an ordinary "down" verdict. An `Err` means the probe itself
/// could not run; callers treat it as down and log it separately.
#[async_trait]
pub trait Availability: Send + Sync {
    async fn probe(&self, target: &Target) -> Result<bool, ProbeError>;
}

/// Default delay between failed GET attempts.
pub const GET_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The tiered HTTP prober.
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
    retry_delay: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        Ok(Self {
            client: build_client(timeout)?,
            timeout,
            retry_delay: GET_RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[async_trait]
impl Availability for HttpProber {
    async fn probe(&self, target: &Target) -> Result<bool, ProbeError> {
        let url = target
            .url()
            .ok_or_else(|| ProbeError::Config(format!("not a valid URL: {}", target)))?;

        // Add jitter to avoid thundering herd
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        if run_head_probe(&self.client, url.as_str()).await {
            return Ok(true);
        }

        match run_get_probe(&self.client, url.as_str(), self.retry_delay).await {
            GetOutcome::Up => return Ok(true),
            GetOutcome::Rejected(status) => {
                tracing::debug!("GET {} answered {}, trying raw probe", target, status);
            }
            GetOutcome::Unreachable => {
                tracing::debug!("GET {} failed {} times, trying raw probe", target, GET_ATTEMPTS);
            }
        }

        Ok(run_raw_probe(&url, self.timeout).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_flaky_http_server, spawn_http_server, Reply};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn prober() -> HttpProber {
        HttpProber::new(Duration::from_secs(2))
            .unwrap()
            .with_retry_delay(Duration::from_millis(10))
    }

    fn local_target(addr: std::net::SocketAddr) -> Target {
        // Stored targets skip validation, which lets tests point at 127.0.0.1.
        Target::from_stored(format!("http://{}/health", addr))
    }

    #[tokio::test]
    async fn test_head_200_is_up() {
        let (addr, mut requests) = spawn_http_server(|_| Reply::new(200, "ok")).await;

        assert!(prober().probe(&local_target(addr)).await.unwrap());
        let first = requests.recv().await.unwrap();
        assert_eq!(first.method, "HEAD");
        assert_eq!(first.path, "/health");
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_get_fallback_when_head_rejected() {
        let (addr, _requests) = spawn_http_server(|req| {
            if req.method == "HEAD" {
                Reply::new(405, "")
            } else {
                Reply::new(200, "ok")
            }
        })
        .await;

        assert!(prober().probe(&local_target(addr)).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_200_everywhere_is_down_and_stops_get_retries() {
        let gets = Arc::new(AtomicUsize::new(0));
        let counter = gets.clone();
        let (addr, _requests) = spawn_http_server(move |req| {
            if req.method == "GET" {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Reply::new(503, "maintenance")
        })
        .await;

        assert!(!prober().probe(&local_target(addr)).await.unwrap());
        assert_eq!(gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_is_retried_after_transport_failure() {
        // HEAD and the first GET are cut off; the second GET succeeds.
        let (addr, mut requests, connections) =
            spawn_flaky_http_server(2, |_| Reply::new(200, "ok")).await;

        assert!(prober().probe(&local_target(addr)).await.unwrap());
        assert_eq!(connections.load(Ordering::SeqCst), 3);
        assert_eq!(requests.recv().await.unwrap().method, "GET");
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_raw_tier_runs_after_get_attempts_are_exhausted() {
        // HEAD plus every GET attempt is cut off; only the raw request is answered.
        let (addr, mut requests, connections) =
            spawn_flaky_http_server(1 + GET_ATTEMPTS, |_| Reply::new(200, "")).await;

        assert!(prober().probe(&local_target(addr)).await.unwrap());
        assert_eq!(connections.load(Ordering::SeqCst), 2 + GET_ATTEMPTS);

        let raw = requests.recv().await.unwrap();
        assert_eq!(raw.method, "HEAD");
        assert_eq!(raw.path, "/health");
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_port_is_down() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(!prober().probe(&local_target(addr)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unparseable_target_is_an_error() {
        let target = Target::from_stored("definitely not a url".to_string());
        tokio_test::assert_err!(prober().probe(&target).await);
    }
}
