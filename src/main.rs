//! sitewatch - website availability and TLS certificate monitor.

use sitewatch::certs::{CertChecker, TlsCertificateSource};
use sitewatch::config::MonitorConfig;
use sitewatch::db::{LegacyFiles, Store};
use sitewatch::events::{event_log_writer, EventLogger, EVENT_TARGET};
use sitewatch::monitor::Monitor;
use sitewatch::notify::{Notifier, TelegramNotifier};
use sitewatch::probe::HttpProber;
use sitewatch::scheduler::Scheduler;

use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load configuration
    let cfg = MonitorConfig::load();
    let _guard = init_tracing(&cfg.log_file)?;

    tracing::info!("Starting sitewatch");
    tracing::info!("Using database at {}", cfg.db_path.display());

    // Initialize database and import legacy files on first run
    let store = Arc::new(Store::new(&cfg.db_path)?);
    let imported = store.import_legacy(&LegacyFiles {
        sites: cfg.legacy_sites_file.clone(),
        status: cfg.legacy_status_file.clone(),
    })?;
    if imported.ran {
        tracing::info!(
            "Legacy import: {} targets, {} status rows",
            imported.targets,
            imported.states
        );
    }
    store.seed_admins(&cfg.initial_admins())?;
    tracing::info!("Database initialized successfully");

    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::from_config(&cfg));
    if cfg.chat_id.is_none() {
        tracing::warn!("CHAT_ID is not set, alerts will only be logged");
    }

    let events = EventLogger::new(store.clone());
    let prober = Arc::new(HttpProber::new(cfg.probe_timeout())?);
    let monitor = Arc::new(Monitor::new(
        store.clone(),
        prober,
        notifier.clone(),
        events.clone(),
    ));
    let certs = Arc::new(CertChecker::new(
        store.clone(),
        Arc::new(TlsCertificateSource::default()),
        events,
    ));

    tracing::info!("Monitoring {} targets", store.list_targets()?.len());

    let scheduler = Scheduler::new(monitor, certs, notifier);
    let handles = scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    scheduler.stop();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

/// Console logging plus a size-capped file that only receives event lines.
fn init_tracing(log_file: &Path) -> Result<WorkerGuard, BoxError> {
    let (writer, guard) = tracing_appender::non_blocking(event_log_writer(log_file)?);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sitewatch=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(console_filter))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .without_time()
                .with_level(false)
                .with_target(false)
                .with_filter(Targets::new().with_target(EVENT_TARGET, tracing::Level::INFO)),
        )
        .init();

    Ok(guard)
}
