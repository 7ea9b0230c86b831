//! TLS certificate expiry checks.

use crate::db::{Store, Target};
use crate::events::{Event, EventLogger, SslStatus};
use crate::monitor::MonitorError;
use crate::tls::{self, TlsError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Certificates expiring within this many days are flagged.
pub const WARNING_DAYS: i64 = 7;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const REPORT_HEADER: &str = "🔐 SSL certificates lifetime:";
const DIGEST_HEADER: &str = "⚠️ Sites with expiring SSL certificates:";

/// Fetches the expiry instant of the certificate served for a host.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn expiry(&self, host: &str) -> Result<DateTime<Utc>, TlsError>;
}

/// Reads `notAfter` from the leaf certificate of a live TLS handshake.
pub struct TlsCertificateSource {
    port: u16,
    timeout: Duration,
}

impl Default for TlsCertificateSource {
    fn default() -> Self {
        Self {
            port: 443,
            timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

impl TlsCertificateSource {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl CertificateSource for TlsCertificateSource {
    async fn expiry(&self, host: &str) -> Result<DateTime<Utc>, TlsError> {
        let stream = tls::connect(host, self.port, self.timeout).await?;
        let der = tls::leaf_certificate(&stream)?;

        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| TlsError::Certificate(e.to_string()))?;
        let not_after = cert.validity().not_after.timestamp();

        DateTime::from_timestamp(not_after, 0)
            .ok_or_else(|| TlsError::Certificate(format!("notAfter out of range: {}", not_after)))
    }
}

/// Outcome for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertFinding {
    Expires { days_left: i64 },
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertLine {
    pub host: String,
    pub finding: CertFinding,
}

impl CertLine {
    pub fn is_warning(&self) -> bool {
        matches!(self.finding, CertFinding::Expires { days_left } if days_left <= WARNING_DAYS)
    }
}

impl fmt::Display for CertLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.finding {
            CertFinding::Expires { days_left } => {
                let icon = if self.is_warning() { "⚠️" } else { "✅" };
                write!(f, "{} {} — {} days", icon, self.host, days_left)
            }
            CertFinding::Unavailable => write!(f, "❌ {}: SSL certificate not available", self.host),
        }
    }
}

/// Result of one certificate sweep, one line per target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertReport {
    pub lines: Vec<CertLine>,
}

impl CertReport {
    pub fn warnings(&self) -> Vec<&CertLine> {
        self.lines.iter().filter(|l| l.is_warning()).collect()
    }

    /// Consolidated alert listing only the warning lines, if there are any.
    pub fn digest(&self) -> Option<String> {
        let warnings = self.warnings();
        if warnings.is_empty() {
            return None;
        }

        let mut text = DIGEST_HEADER.to_string();
        for line in warnings {
            text.push('\n');
            text.push_str(&line.to_string());
        }
        Some(text)
    }
}

impl fmt::Display for CertReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REPORT_HEADER)?;
        for line in &self.lines {
            write!(f, "\n{}", line)?;
        }
        Ok(())
    }
}

/// Whole days until `expiry`, rounded down.
pub fn days_until(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expiry - now).num_seconds().div_euclid(86_400)
}

pub struct CertChecker {
    store: Arc<Store>,
    source: Arc<dyn CertificateSource>,
    events: EventLogger,
}

impl CertChecker {
    pub fn new(store: Arc<Store>, source: Arc<dyn CertificateSource>, events: EventLogger) -> Self {
        Self {
            store,
            source,
            events,
        }
    }

    pub async fn check_certificates(&self) -> Result<CertReport, MonitorError> {
        self.check_certificates_at(Utc::now()).await
    }

    /// Check every target in turn. A failing host only affects its own line.
    pub async fn check_certificates_at(&self, now: DateTime<Utc>) -> Result<CertReport, MonitorError> {
        let targets = self.store.list_targets()?;
        let mut report = CertReport::default();

        for target in &targets {
            report.lines.push(self.check_target(target, now).await);
        }

        tracing::info!(
            "Certificate check finished: {} targets, {} expiring soon",
            report.lines.len(),
            report.warnings().len()
        );
        Ok(report)
    }

    async fn check_target(&self, target: &Target, now: DateTime<Utc>) -> CertLine {
        let Some(host) = target.host() else {
            tracing::warn!("Cannot derive a host name from {}", target);
            return self.unavailable(target.to_string());
        };

        match self.source.expiry(&host).await {
            Ok(expiry) => {
                let days_left = days_until(expiry, now);
                self.events.record(Event::SslCheck {
                    target: host.clone(),
                    status: SslStatus::Valid,
                    days_left: Some(days_left),
                });

                let line = CertLine {
                    host,
                    finding: CertFinding::Expires { days_left },
                };
                if line.is_warning() {
                    self.events.record(Event::SslAlert {
                        target: line.host.clone(),
                        days_left,
                    });
                }
                line
            }
            Err(e) => {
                tracing::warn!("Certificate check failed for {}: {}", host, e);
                self.unavailable(host)
            }
        }
    }

    fn unavailable(&self, host: String) -> CertLine {
        self.events.record(Event::SslCheck {
            target: host.clone(),
            status: SslStatus::Error,
            days_left: None,
        });
        CertLine {
            host,
            finding: CertFinding::Unavailable,
        }
    }
}
