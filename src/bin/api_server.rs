use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use gamedex::api::server::ApiServer;
use gamedex::catalog::{self, Db};
use gamedex::config::AppConfig;
use gamedex::queue::SyncQueues;
use gamedex::realtime::{listener, Hub, RealtimeServer};

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
    let queues = SyncQueues::new(queue_db);
    queues.ensure_queues().await?;

    // Realtime bus: WebSocket endpoint + the LISTEN bridge that feeds it
    // events published by worker processes.
    let hub = Arc::new(Hub::new());
    let ws_auth_token = if config.auth_enabled() {
        config.secret_key.clone()
    } else {
        None
    };
    if config.auth_enabled() && ws_auth_token.is_none() {
        warn!("auth enabled but SECRET_KEY unset; realtime connections will be rejected");
    }
    let realtime = RealtimeServer::new(hub.clone(), ws_auth_token);
    let realtime_addr = config.realtime_addr.clone();
    tokio::spawn(async move {
        if let Err(err) = realtime.run(&realtime_addr).await {
            tracing::error!(error = %err, "realtime server exited");
        }
    });
    tokio::spawn(listener::run_bridge_supervised(
        config.bus_url.clone(),
        hub.clone(),
    ));

    info!("gamedex api starting");
    ApiServer::from_config(&config).run(db, queues, config).await
}
