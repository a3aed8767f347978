#![cfg_attr(test, allow(clippy::unwrap_used))]

//! PAMDes billing worker
//!
//! Runs the scheduled sweeps the API relies on: payment expiry, overdue
//! marking and the invariant report.

mod config;
mod jobs;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use pamdes_billing::BillingService;
use pamdes_shared::{create_pool, PoolSettings};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::WorkerConfig;

type JobFn = fn(Arc<BillingService>) -> Pin<Box<dyn Future<Output = ()> + Send>>;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pamdes_worker=debug,pamdes_billing=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Schedule `run`; a tick that arrives while the previous run is still going is skipped
fn sweep_job(
    name: &'static str,
    schedule: &str,
    billing: Arc<BillingService>,
    run: JobFn,
) -> anyhow::Result<Job> {
    let running = Arc::new(Mutex::new(()));

    let job = Job::new_async(schedule, move |_id, _scheduler| {
        let billing = billing.clone();
        let running = running.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!(job = name, "Previous run still in progress, skipping tick");
                return;
            };
            tracing::debug!(job = name, "Sweep started");
            run(billing).await;
        })
    })
    .with_context(|| format!("invalid schedule for {}: {}", name, schedule))?;

    Ok(job)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env().context("Failed to load worker configuration")?;

    let pool = create_pool(
        &config.database_url,
        &PoolSettings {
            max_connections: config.database_max_connections,
            ..PoolSettings::default()
        },
    )
    .await
    .context("Failed to connect to database")?;

    let billing = Arc::new(BillingService::from_env(pool)?);
    let scheduler = JobScheduler::new().await?;

    scheduler
        .add(sweep_job(
            "expire_stale_payments",
            &config.expiry_sweep_cron,
            billing.clone(),
            |b| Box::pin(async move { jobs::expire_stale_payments(&b).await }),
        )?)
        .await?;

    scheduler
        .add(sweep_job(
            "mark_overdue_bills",
            &config.overdue_sweep_cron,
            billing.clone(),
            |b| Box::pin(async move { jobs::mark_overdue_bills(&b).await }),
        )?)
        .await?;

    match &config.invariant_check_cron {
        Some(schedule) => {
            scheduler
                .add(sweep_job(
                    "report_invariants",
                    schedule,
                    billing.clone(),
                    |b| Box::pin(async move { jobs::report_invariants(&b).await }),
                )?)
                .await?;
        }
        None => tracing::info!("Invariant report disabled"),
    }

    scheduler.start().await?;
    tracing::info!(
        expiry = %config.expiry_sweep_cron,
        overdue = %config.overdue_sweep_cron,
        invariants = ?config.invariant_check_cron,
        "PAMDes worker started"
    );

    // Catch up on anything that lapsed while the worker was down
    jobs::expire_stale_payments(&billing).await;
    jobs::mark_overdue_bills(&billing).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let mut scheduler = scheduler;
    scheduler.shutdown().await?;
    Ok(())
}
