//! Operator CLI: enqueue sync jobs directly, bypassing the HTTP API.
//!
//! Usage:
//!   enqueue_sync <library_id> [--force] [--type manual|incremental|full]
//!   enqueue_sync --all          (scheduled sweep over sync-enabled libraries)

use anyhow::{bail, Result};
use uuid::Uuid;

use gamedex::catalog::models::OperationType;
use gamedex::catalog::Db;
use gamedex::config::AppConfig;
use gamedex::queue::{JobPayload, Priority, SyncJob, SyncQueues};

#[tokio::main]
async fn main() -> Result<()> {
    gamedex::util::env::init_env();
    gamedex::logging::init_tracing("info")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = AppConfig::from_env()?;
    let db = Db::connect(&config.database_url, 5).await?;
    let queue_db = if config.queue_url == config.database_url {
        db.clone()
    } else {
        Db::connect(&config.queue_url, 5).await?
    };
    let queues = SyncQueues::new(queue_db);
    queues.ensure_queues().await?;

    if args.iter().any(|a| a == "--all") {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT library_id FROM user_libraries WHERE sync_enabled ORDER BY last_sync_at NULLS FIRST",
        )
        .persistent(false)
        .fetch_all(&db.pool)
        .await?;
        for (library_id,) in &rows {
            let job = SyncJob::new(*library_id, false, OperationType::IncrementalSync);
            queues
                .enqueue(Priority::Default, &JobPayload::Sync(job), 0)
                .await?;
            println!("enqueued incremental sync for {library_id}");
        }
        println!("{} libraries queued", rows.len());
        return Ok(());
    }

    let Some(library_id) = args.first().and_then(|a| Uuid::parse_str(a).ok()) else {
        bail!("usage: enqueue_sync <library_id> [--force] [--type manual|incremental|full] | --all");
    };
    let force = args.iter().any(|a| a == "--force");
    let sync_type = match args
        .iter()
        .position(|a| a == "--type")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
    {
        None | Some("manual") => OperationType::ManualSync,
        Some("incremental") => OperationType::IncrementalSync,
        Some("full") => OperationType::FullSync,
        Some(other) => bail!("unknown sync type '{other}'"),
    };
    let priority = match sync_type {
        OperationType::ManualSync => Priority::High,
        _ => Priority::Default,
    };

    let job = SyncJob::new(library_id, force, sync_type);
    let job_id = job.job_id;
    let msg_id = queues
        .enqueue(priority, &JobPayload::Sync(job), 0)
        .await?;
    println!(
        "enqueued {sync_type:?} for {library_id} on {} (job {job_id}, msg {msg_id})",
        priority.queue_name()
    );
    Ok(())
}
