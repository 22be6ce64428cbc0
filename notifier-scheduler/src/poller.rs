use anyhow::Result;
use chrono::Utc;
use notifier_core::config::SchedulerConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::sweeps::Sweeper;

async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(sweep = name, ?period, "Starting sweep");

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!(sweep = name, "Sweep stopped");
                    return;
                }
            }
            _ = interval.tick() => tick().await,
        }
    }
}

/// Runs the due, retry and retention sweeps on independent intervals until
/// `shutdown` flips to true.
pub async fn run(
    sweeper: Arc<Sweeper>,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let due = {
        let sweeper = sweeper.clone();
        run_every(
            "due",
            Duration::from_secs(config.due_interval_secs.max(1)),
            shutdown.clone(),
            move || {
                let sweeper = sweeper.clone();
                async move {
                    match sweeper.due_sweep(Utc::now()).await {
                        Ok(report) if report.selected > 0 => {
                            tracing::info!(?report, "Due sweep finished")
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Due sweep failed: {}", e),
                    }
                }
            },
        )
    };

    let retry = {
        let sweeper = sweeper.clone();
        run_every(
            "retry",
            Duration::from_secs(config.retry_interval_secs.max(1)),
            shutdown.clone(),
            move || {
                let sweeper = sweeper.clone();
                async move {
                    match sweeper.retry_sweep(Utc::now()).await {
                        Ok(report) if report.selected > 0 => {
                            tracing::info!(?report, "Retry sweep finished")
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Retry sweep failed: {}", e),
                    }
                }
            },
        )
    };

    let retention = run_every(
        "retention",
        Duration::from_secs(config.retention_interval_secs.max(1)),
        shutdown,
        move || {
            let sweeper = sweeper.clone();
            async move {
                if let Err(e) = sweeper.retention_sweep(Utc::now()).await {
                    tracing::error!("Retention sweep failed: {}", e);
                }
            }
        },
    );

    tokio::join!(due, retry, retention);
    Ok(())
}

/// Runs every sweep once, in order. Used at startup to drain work left over
/// from a previous process.
pub async fn run_once(sweeper: &Sweeper) {
    let now = Utc::now();
    if let Err(e) = sweeper.due_sweep(now).await {
        tracing::warn!("Startup due sweep failed: {}", e);
    }
    if let Err(e) = sweeper.retry_sweep(now).await {
        tracing::warn!("Startup retry sweep failed: {}", e);
    }
}
