//! Scheduler driving the monitoring cycle and certificate checks.

use crate::certs::CertChecker;
use crate::monitor::{Monitor, MonitorError};
use crate::notify::Notifier;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Interval between monitoring cycles.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);
/// UTC hour of the daily certificate digest.
pub const DIGEST_HOUR: u32 = 6;
/// UTC hour of the secondary certificate sweep run from the tick loop.
pub const MAINTENANCE_HOUR: u32 = 3;

/// Runs the tick loop and the daily digest loop as background tasks.
pub struct Scheduler {
    monitor: Arc<Monitor>,
    certs: Arc<CertChecker>,
    notifier: Arc<dyn Notifier>,
    stop: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(monitor: Arc<Monitor>, certs: Arc<CertChecker>, notifier: Arc<dyn Notifier>) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            monitor,
            certs,
            notifier,
            stop,
        }
    }

    /// Spawn both loops.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        tracing::info!(
            "Starting scheduler: cycle every {:?}, certificate digest at {:02}:00 UTC",
            TICK_INTERVAL,
            DIGEST_HOUR
        );

        vec![
            tokio::spawn(run_tick_loop(
                self.monitor.clone(),
                self.certs.clone(),
                self.stop.subscribe(),
            )),
            tokio::spawn(run_daily_loop(
                self.certs.clone(),
                self.notifier.clone(),
                self.stop.subscribe(),
                |now| next_daily_run(now, DIGEST_HOUR),
            )),
        ]
    }

    /// Signal both loops to exit.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

/// Run a cycle every tick; at 03:00 UTC also sweep certificates.
///
/// A slow cycle delays the next tick instead of overlapping it.
async fn run_tick_loop(monitor: Arc<Monitor>, certs: Arc<CertChecker>, mut stop_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                let now = Utc::now();

                if let Err(e) = monitor.run_cycle().await {
                    tracing::error!("Monitoring cycle failed: {}", e);
                }

                if is_maintenance_slot(now) {
                    if let Err(e) = certs.check_certificates().await {
                        tracing::error!("Certificate sweep failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Sleep until the next digest time, check certificates, alert on warnings.
/// A failed digest is logged and the loop waits for the following slot.
async fn run_daily_loop<F>(
    certs: Arc<CertChecker>,
    notifier: Arc<dyn Notifier>,
    mut stop_rx: broadcast::Receiver<()>,
    next_run: F,
) where
    F: Fn(DateTime<Utc>) -> DateTime<Utc>,
{
    loop {
        let now = Utc::now();
        let next = next_run(now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!("Next certificate digest at {}", next);

        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(wait) => {
                if let Err(e) = send_certificate_digest(&certs, notifier.as_ref()).await {
                    tracing::error!("Certificate digest failed: {}", e);
                }
            }
        }
    }
}

/// Check certificates and send the digest when something expires soon.
///
/// Returns the digest text that was sent, if any.
pub async fn send_certificate_digest(
    certs: &CertChecker,
    notifier: &dyn Notifier,
) -> Result<Option<String>, MonitorError> {
    let report = certs.check_certificates().await?;
    let digest = report.digest();
    if let Some(text) = &digest {
        notifier.notify(text).await;
    }
    Ok(digest)
}

/// Next `hour`:00 UTC after `now`. Rolls to tomorrow once today's slot is
/// reached.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let slot = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(slot).and_utc();
    if now >= today {
        today + ChronoDuration::days(1)
    } else {
        today
    }
}

pub fn is_maintenance_slot(now: DateTime<Utc>) -> bool {
    now.hour() == MAINTENANCE_HOUR && now.minute() == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::{CertificateSource, TlsCertificateSource};
    use crate::db::{Store, Target};
    use crate::events::EventLogger;
    use crate::probe::{Availability, ProbeError};
    use crate::testing::RecordingNotifier;
    use crate::tls::TlsError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_next_daily_run() {
        assert_eq!(next_daily_run(at(5, 59, 59), 6), at(6, 0, 0));
        assert_eq!(
            next_daily_run(at(6, 0, 0), 6),
            Utc.with_ymd_and_hms(2024, 3, 11, 6, 0, 0).unwrap()
        );
        assert_eq!(
            next_daily_run(at(23, 30, 0), 6),
            Utc.with_ymd_and_hms(2024, 3, 11, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_maintenance_slot() {
        assert!(is_maintenance_slot(at(3, 0, 0)));
        assert!(is_maintenance_slot(at(3, 0, 59)));
        assert!(!is_maintenance_slot(at(3, 1, 0)));
        assert!(!is_maintenance_slot(at(15, 0, 0)));
    }

    struct ExpiringSoon;

    #[async_trait]
    impl CertificateSource for ExpiringSoon {
        async fn expiry(&self, _host: &str) -> Result<DateTime<Utc>, TlsError> {
            Ok(Utc::now() + ChronoDuration::days(2) + ChronoDuration::hours(1))
        }
    }

    struct AlwaysUp;

    #[async_trait]
    impl Availability for AlwaysUp {
        async fn probe(&self, _target: &Target) -> Result<bool, ProbeError> {
            Ok(true)
        }
    }

    fn store_with_target() -> (NamedTempFile, Arc<Store>) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        store
            .replace_targets(&[Target::parse("https://soon.example.com").unwrap()])
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn test_digest_is_sent_for_warnings() {
        let (_tmp, store) = store_with_target();
        let certs = CertChecker::new(store.clone(), Arc::new(ExpiringSoon), EventLogger::new(store));
        let notifier = RecordingNotifier::default();

        let sent = send_certificate_digest(&certs, &notifier).await.unwrap();

        assert_eq!(
            sent.as_deref(),
            Some("⚠️ Sites with expiring SSL certificates:\n⚠️ soon.example.com — 2 days")
        );
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_daily_loop_survives_failed_digest() {
        let (tmp, store) = store_with_target();
        {
            let conn = rusqlite::Connection::open(tmp.path()).unwrap();
            conn.execute_batch("DROP TABLE sites").unwrap();
        }
        let certs = Arc::new(CertChecker::new(
            store.clone(),
            Arc::new(ExpiringSoon),
            EventLogger::new(store.clone()),
        ));
        assert!(send_certificate_digest(&certs, &RecordingNotifier::default())
            .await
            .is_err());

        let notifier = Arc::new(RecordingNotifier::default());
        let (stop, stop_rx) = broadcast::channel(1);
        let slots = Arc::new(AtomicUsize::new(0));
        let counter = slots.clone();
        let handle = tokio::spawn(run_daily_loop(certs, notifier.clone(), stop_rx, move |now| {
            counter.fetch_add(1, Ordering::SeqCst);
            now + ChronoDuration::milliseconds(10)
        }));

        for _ in 0..100 {
            if slots.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(slots.load(Ordering::SeqCst) >= 3);
        assert!(!handle.is_finished());
        assert!(notifier.messages().is_empty());

        stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_runs_first_cycle_and_stops() {
        let (_tmp, store) = store_with_target();
        let events = EventLogger::new(store.clone());
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = Arc::new(Monitor::new(
            store.clone(),
            Arc::new(AlwaysUp),
            notifier.clone(),
            events.clone(),
        ));
        let certs = Arc::new(CertChecker::new(
            store.clone(),
            Arc::new(TlsCertificateSource::default()),
            events,
        ));

        let scheduler = Scheduler::new(monitor, certs, notifier);
        let handles = scheduler.start();

        // The first interval tick fires immediately.
        for _ in 0..100 {
            if store.count_events().unwrap() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(store.count_events().unwrap() > 0);

        scheduler.stop();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(15), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
