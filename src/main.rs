//! FleetWatch - field unit status monitor
//!
//! Polls a connectivity tracker and a telemetry platform, reconciles both
//! into one status per unit, and mails reports and change alerts.

mod client;
mod config;
mod engine;
mod models;
mod monitor;
mod notify;
mod report;
mod scheduler;
mod store;

use config::RunConfig;
use monitor::{Monitor, RunTrigger};
use notify::SmtpMailer;
use scheduler::{Schedule, Scheduler};

use chrono::Local;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("fleetwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = RunConfig::load()?;
    tracing::info!(
        "Starting FleetWatch for {} with {} units",
        cfg.telemetry.label,
        cfg.units.len()
    );
    tracing::info!("Using state directory {}", cfg.state_dir.display());

    let schedule = Schedule::from_config(&cfg.schedule)?;
    let poll_interval = cfg.schedule.poll_interval();
    let mailer = SmtpMailer::new(&cfg.email)?;
    let monitor = Monitor::new(cfg, mailer)?;

    // Seed the snapshot without alerting
    let started_at = Local::now().naive_local();
    match monitor.run(RunTrigger::Startup).await {
        Ok(summary) => tracing::info!("Startup run complete: {}", summary),
        Err(e) => tracing::error!("Startup run failed: {}", e),
    }

    let mut scheduler = Scheduler::new(schedule, poll_interval, started_at);
    scheduler
        .run(|kind| {
            let monitor = &monitor;
            async move {
                match monitor.run(RunTrigger::Scheduled(kind)).await {
                    Ok(summary) => tracing::info!("{} run complete: {}", kind, summary),
                    Err(e) => tracing::error!("{} run aborted: {}", kind, e),
                }
            }
        })
        .await;

    Ok(())
}
