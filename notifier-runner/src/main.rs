use anyhow::Result;
use notifier_api::ApiState;
use notifier_core::db::run_migrations;
use notifier_core::{Config, NotifierContext};
use notifier_delivery::{ChannelSet, Dispatcher};
use notifier_router::consumer::{run_requests, run_task_events};
use notifier_router::{KafkaRequestPublisher, NotificationRouter, PreferenceResolver};
use notifier_scheduler::Sweeper;
use std::sync::Arc;
use tokio::sync::watch;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();

    tracing::info!("Starting notification service");

    let config = Config::from_env();
    run_migrations(&config.database).await?;
    let ctx = NotifierContext::new(config).await?;
    tracing::info!("Notifier context initialized");

    let notifications = ctx.notification_store();
    let templates = ctx.template_store();
    let channels = ChannelSet::from_context(&ctx)?;
    let dispatcher = Arc::new(Dispatcher::new(
        notifications.clone(),
        templates.clone(),
        channels,
    ));
    let preferences = Arc::new(PreferenceResolver::new(ctx.preference_store()));
    let router = Arc::new(NotificationRouter::new(
        notifications.clone(),
        preferences.clone(),
        dispatcher.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let (task_ctx, task_router, task_shutdown) = (ctx.clone(), router.clone(), shutdown_rx.clone());
    tasks.push(tokio::spawn(async move {
        if let Err(e) = run_task_events(task_ctx, task_router, task_shutdown).await {
            tracing::error!("Task event consumer error: {:#}", e);
        }
    }));

    let (request_ctx, request_router, request_shutdown) =
        (ctx.clone(), router.clone(), shutdown_rx.clone());
    tasks.push(tokio::spawn(async move {
        if let Err(e) = run_requests(request_ctx, request_router, request_shutdown).await {
            tracing::error!("Notification request consumer error: {:#}", e);
        }
    }));

    if ctx.config.scheduler.enabled {
        let sweeper = Arc::new(Sweeper::new(
            notifications.clone(),
            dispatcher.clone(),
            ctx.config.scheduler.retention_days,
        ));
        notifier_scheduler::run_once(&sweeper).await;

        let scheduler_config = ctx.config.scheduler.clone();
        let scheduler_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = notifier_scheduler::run(sweeper, scheduler_config, scheduler_shutdown).await {
                tracing::error!("Scheduler error: {:#}", e);
            }
        }));
    } else {
        tracing::info!("Scheduler disabled");
    }

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let state = ApiState {
        notifications,
        templates,
        preferences,
        router,
        publisher: Arc::new(KafkaRequestPublisher::new(ctx.redpanda_producer.clone())),
    };
    notifier_api::run(state, &ctx.config.server, shutdown_rx).await?;

    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }
    tracing::info!("Notification service stopped");
    Ok(())
}
