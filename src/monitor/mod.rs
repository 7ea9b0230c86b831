//! Monitoring cycle: probe every target, track outages, raise alerts.

mod alert;
mod commands;

pub use alert::*;
pub use commands::*;

use crate::db::{DbError, DownState, Store, Target};
use crate::events::{Event, EventLogger};
use crate::notify::Notifier;
use crate::probe::Availability;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Upper bound on concurrent probes within one cycle.
pub const MAX_PROBE_WORKERS: usize = 10;

/// Errors that abort a whole cycle or sweep.
///
/// Per-target probe failures never show up here; they are logged and the
/// target counts as down.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("store unavailable: {0}")]
    Store(#[from] DbError),
}

/// Counters for one monitoring cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub checked: usize,
    pub up: usize,
    pub down: usize,
    pub alerts: usize,
}

pub struct Monitor {
    store: Arc<Store>,
    prober: Arc<dyn Availability>,
    notifier: Arc<dyn Notifier>,
    events: EventLogger,
}

impl Monitor {
    pub fn new(
        store: Arc<Store>,
        prober: Arc<dyn Availability>,
        notifier: Arc<dyn Notifier>,
        events: EventLogger,
    ) -> Self {
        Self {
            store,
            prober,
            notifier,
            events,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary, MonitorError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as if the clock read `now`.
    ///
    /// State is read once before probing and written once at the end.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleSummary, MonitorError> {
        let targets = self.store.list_targets()?;
        if targets.is_empty() {
            return Ok(CycleSummary::default());
        }

        let mut state = self.store.get_state()?;
        let results = self.probe_all(&targets).await;

        let mut summary = CycleSummary {
            checked: results.len(),
            ..Default::default()
        };

        for (target, up) in results {
            let previous = state.get(&target).copied().unwrap_or_default();
            let transition = evaluate(previous, up, now);

            match transition {
                Transition::Recovered => {
                    self.events.record(Event::site_up(target.as_str()));
                    self.notifier.notify(&recovery_message(target.as_str())).await;
                    summary.alerts += 1;
                }
                Transition::StillUp => {
                    self.events.record(Event::site_up(target.as_str()));
                }
                Transition::WentDown => {
                    tracing::info!("{} is unreachable, outage started at {}", target, now);
                    self.events.record(Event::site_down(target.as_str(), None));
                }
                Transition::StillDown { minutes, alert } => {
                    let duration = alert.then_some(minutes);
                    self.events.record(Event::site_down(target.as_str(), duration));
                    if alert {
                        self.notifier.notify(&down_message(target.as_str(), minutes)).await;
                        summary.alerts += 1;
                    }
                }
            }

            if up {
                summary.up += 1;
            } else {
                summary.down += 1;
            }

            state.insert(target, transition.next_state(previous, now));
        }

        self.store.replace_state(&state)?;

        tracing::debug!(
            "Cycle finished: {} checked, {} up, {} down, {} alerts",
            summary.checked,
            summary.up,
            summary.down,
            summary.alerts
        );
        Ok(summary)
    }

    /// Probe all targets on a bounded pool. Results keep the input order.
    async fn probe_all(&self, targets: &[Target]) -> Vec<(Target, bool)> {
        let semaphore = Arc::new(Semaphore::new(targets.len().min(MAX_PROBE_WORKERS)));

        let handles: Vec<_> = targets
            .iter()
            .map(|target| {
                let semaphore = semaphore.clone();
                let prober = self.prober.clone();
                let target = target.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    prober.probe(&target).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(targets.len());
        for (target, handle) in targets.iter().zip(handles) {
            let up = match handle.await {
                Ok(Ok(up)) => up,
                Ok(Err(e)) => {
                    self.record_probe_error(target, e.to_string());
                    false
                }
                Err(e) => {
                    self.record_probe_error(target, e.to_string());
                    false
                }
            };
            results.push((target.clone(), up));
        }
        results
    }

    fn record_probe_error(&self, target: &Target, error: String) {
        tracing::warn!("Probe for {} failed: {}", target, error);
        self.events.record(Event::SiteCheckError {
            target: target.to_string(),
            error,
        });
    }

    /// Current downtime state of `target`, or up if it has no row.
    pub fn state_of(&self, target: &Target) -> Result<DownState, DbError> {
        Ok(self.store.get_state()?.get(target).copied().unwrap_or_default())
    }
}
