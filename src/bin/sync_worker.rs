use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio_postgres::{AsyncMessage, NoTls};
use tracing::{error, info, warn};

use gamedex::catalog::{self, Db};
use gamedex::config::AppConfig;
use gamedex::platforms::steam::SteamAdapter;
use gamedex::platforms::PlatformAdapter;
use gamedex::queue::{SyncQueues, WAKE_CHANNEL};
use gamedex::ratelimit::RateLimiter;
use gamedex::sync::{self, SyncState, WorkerContext};

#[tokio::main]
async fn main() -> Result<()> {
    gamedex::util::env::init_env();
    gamedex::logging::init_tracing("info")?;

    let config = AppConfig::from_env()?;
    let db = Db::connect(&config.database_url, config.max_connections).await?;
    catalog::platforms::seed_platforms(&db).await?;

    let queue_db = if config.queue_url == config.database_url {
        db.clone()
    } else {
        Db::connect(&config.queue_url, 5).await?
    };
    let queues = SyncQueues::new(queue_db.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    let state = SyncState::new(db.clone(), shutdown.clone());

    // Adapter registry: one per platform with a live API. Rate-limit state
    // is shared through the queue database so every worker draws from the
    // same per-platform budget.
    let limiter = Arc::new(RateLimiter::new(queue_db));
    let mut adapters: HashMap<String, Arc<dyn PlatformAdapter>> = HashMap::new();
    match &config.steam_api_key {
        Some(key) => {
            adapters.insert(
                "steam".to_string(),
                Arc::new(SteamAdapter::new(
                    key.clone(),
                    limiter.clone(),
                    Duration::from_secs(config.cache_ttl_secs),
                )),
            );
        }
        None => warn!("STEAM_API_KEY unset; steam syncs will fail until configured"),
    }

    let ctx = Arc::new(WorkerContext {
        db: db.clone(),
        queues,
        state,
        adapters,
        batch_size: config.sync_batch_size,
        job_timeout: Duration::from_secs(config.sync_job_timeout_secs),
        max_transient_retries: config.sync_max_transient_retries,
    });
    sync::startup_maintenance(&ctx).await?;

    // Wake on queue NOTIFY so idle workers pick new jobs up immediately.
    let wake = Arc::new(Notify::new());
    tokio::spawn(listen_for_wakes(config.bus_url.clone(), wake.clone()));

    info!(workers = config.workers, holder = ctx.state.holder(), "sync worker starting");
    let mut tasks = Vec::with_capacity(config.workers);
    for n in 0..config.workers {
        let ctx = ctx.clone();
        let wake = wake.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = sync::run_worker_loop(ctx, wake).await {
                error!(worker = n, error = %err, "worker loop exited with error");
            }
        }));
    }

    // Graceful drain: stop accepting jobs; in-flight jobs observe the flag
    // at their next pause check, checkpoint, and exit.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining workers");
    shutdown.store(true, Ordering::Relaxed);
    wake.notify_waiters();
    for task in tasks {
        let _ = task.await;
    }
    info!("sync worker stopped");
    Ok(())
}

/// LISTEN on the queue wake channel and pulse the notifier on each message.
async fn listen_for_wakes(bus_url: String, wake: Arc<Notify>) {
    loop {
        match tokio_postgres::connect(&bus_url, NoTls).await {
            Ok((client, mut connection)) => {
                let wake_stream = wake.clone();
                let poll = tokio::spawn(async move {
                    let mut stream =
                        futures::stream::poll_fn(move |cx| connection.poll_message(cx));
                    while let Some(msg) = stream.next().await {
                        match msg {
                            Ok(AsyncMessage::Notification(_)) => wake_stream.notify_waiters(),
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "wake LISTEN dropped");
                                break;
                            }
                        }
                    }
                });
                if let Err(e) = client.batch_execute(&format!("LISTEN {WAKE_CHANNEL};")).await {
                    warn!(error = %e, "failed to LISTEN on wake channel");
                }
                let _ = poll.await;
            }
            Err(e) => warn!(error = %e, "wake listener connect failed"),
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
