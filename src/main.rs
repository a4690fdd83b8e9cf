//! netlure: lightweight async network deception daemon
//!
//! This binary orchestrates the honeypot: load config, start per-service
//! listeners, the classifier-backed event pipeline, the batch reporter, and
//! the guarded management API, then wait for Ctrl+C.

use anyhow::Result;
use clap::Parser;
use netlure::classifier::{Classifier, ClassifierConfig};
use netlure::config::{Cli, Config};
use netlure::event::{EventBus, EventPipeline};
use netlure::guard::{Guard, GuardConfig};
use netlure::listener::Listeners;
use netlure::metrics::{spawn_admin_server, Metrics};
use netlure::reporter::Reporter;
use netlure::service;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_cli(&cli)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cfg.log_format == "json" {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }

    if cli.list_services {
        for svc in service::resolve(&cfg.services)? {
            println!("{}/{} port {}", svc.protocol, svc.transport, svc.port);
        }
        return Ok(());
    }

    let bus = Arc::new(EventBus::new(cfg.event_buffer_capacity));
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(4);

    if cli.resend_pending {
        let reporter = Reporter::new(cfg.clone(), bus.clone(), shutdown_tx.subscribe());
        reporter.recover_pending_files_once().await;
        return Ok(());
    }

    let metrics = Arc::new(Metrics::default());
    let classifier = Arc::new(Classifier::new(ClassifierConfig {
        scorer_timeout: Duration::from_millis(cfg.external_scorer_timeout_ms),
        ..ClassifierConfig::default()
    }));
    let pipeline = EventPipeline::new(bus.clone(), classifier, Some(metrics.clone()));

    // Management API behind the rate-limiter/blacklist guard.
    if let Some(addr) = cfg.admin_addr.clone() {
        let guard = Arc::new(Guard::new(GuardConfig {
            window: chrono::Duration::seconds(cfg.admin_window_seconds as i64),
            max_requests: cfg.admin_max_requests,
            ban_duration: chrono::Duration::seconds(cfg.admin_ban_seconds as i64),
            whitelist: cfg.admin_whitelist.iter().copied().collect(),
        }));
        let sweeper = guard.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(300)).await;
                sweeper.sweep();
            }
        });
        spawn_admin_server(addr, metrics.clone(), bus.clone(), guard).await;
    }

    let listeners = Listeners::new(cfg.clone(), pipeline, shutdown_tx.subscribe())?;
    let listener_handle = tokio::spawn(async move { listeners.run().await });

    let mut reporter = Reporter::new(cfg, bus, shutdown_tx.subscribe());
    let reporter_handle = tokio::spawn(async move { reporter.run().await });

    info!("netlure running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let _ = shutdown_tx.send(());
    // Grace period for in-flight sessions, then exit regardless.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = listener_handle.await;
        let _ = reporter_handle.await;
    })
    .await;
    Ok(())
}
