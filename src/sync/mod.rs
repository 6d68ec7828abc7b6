//! Sync engine: shared checkpoint/lock state, progress publication, and the
//! queue-driven worker loop.

pub mod progress;
pub mod state;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::queue::{JobPayload, Priority};
use worker::{run_enrich_job, run_sync_job, SyncOutcome};

const ARCHIVE_RETENTION_HOURS: i64 = 24;

/// One worker task: pop by priority, heartbeat the message's visibility
/// timeout while the job runs, and settle the message according to the
/// outcome and the queue's attempt budget.
pub async fn run_worker_loop(ctx: Arc<WorkerContext>, wake: Arc<Notify>) -> Result<()> {
    let poll_delay = Duration::from_secs(crate::util::env::env_parse("SYNC_QUEUE_POLL_SECS", 2u64).max(1));

    loop {
        if ctx.state.shutting_down() {
            info!("worker draining, exiting loop");
            return Ok(());
        }

        let popped = match ctx.queues.dequeue().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "queue dequeue failed");
                sleep(poll_delay).await;
                continue;
            }
        };

        let Some(popped) = popped else {
            tokio::select! {
                _ = sleep(poll_delay) => {}
                _ = wake.notified() => {}
            }
            continue;
        };

        let vt = ctx.queues.visibility_timeout_secs();
        let (hb_tx, mut hb_rx) = tokio::sync::oneshot::channel::<()>();
        let hb_queues = ctx.queues.clone();
        let hb_priority = popped.priority;
        let hb_msg_id = popped.msg_id;
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs((vt as u64).max(4) / 2));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let _ = hb_queues.extend_visibility(hb_priority, hb_msg_id, vt).await;
                    }
                    _ = &mut hb_rx => break,
                }
            }
        });

        let result = tokio::time::timeout(ctx.job_timeout, dispatch(&ctx, &popped.payload)).await;
        let _ = hb_tx.send(());

        match result {
            Ok(Ok(())) => {
                ctx.queues.complete(popped.priority, popped.msg_id).await?;
            }
            Ok(Err(err)) => {
                warn!(msg_id = popped.msg_id, error = %err, "job failed");
                settle_failure(&ctx, popped.priority, popped.msg_id, popped.read_ct).await?;
            }
            Err(_elapsed) => {
                // Hard timeout: release the library lock so the next attempt
                // can resume from the checkpoint.
                warn!(msg_id = popped.msg_id, "job hit hard timeout");
                if let JobPayload::Sync(job) = &popped.payload {
                    let _ = state::SyncState::force_release_lock(&ctx.db, job.library_id).await;
                    let _ = ctx
                        .state
                        .set_status(
                            job.library_id,
                            crate::catalog::models::SyncStatus::Failed,
                            Some("sync timed out"),
                        )
                        .await;
                }
                settle_failure(&ctx, popped.priority, popped.msg_id, popped.read_ct).await?;
            }
        }
    }
}

async fn dispatch(ctx: &WorkerContext, payload: &JobPayload) -> Result<()> {
    match payload {
        JobPayload::Sync(job) => match run_sync_job(ctx, job).await? {
            SyncOutcome::Finished(summary) => {
                info!(
                    library_id = %job.library_id,
                    status = ?summary.status,
                    processed = summary.games_processed,
                    added = summary.games_added,
                    updated = summary.games_updated,
                    duration_ms = summary.duration_ms,
                    "sync job settled"
                );
                Ok(())
            }
            SyncOutcome::AlreadySyncing => Ok(()),
        },
        JobPayload::Enrich(job) => run_enrich_job(ctx, job).await,
    }
}

/// Retry with exponential visibility delay until the queue's attempt budget
/// is spent, then archive (the archive is the failure record).
async fn settle_failure(
    ctx: &WorkerContext,
    priority: Priority,
    msg_id: i64,
    read_ct: i32,
) -> Result<()> {
    // pgmq counts the in-flight read, so read_ct is the attempt just made.
    let attempt = (read_ct.max(1)) as u32;
    if attempt >= priority.max_attempts() {
        info!(msg_id, attempt, queue = priority.queue_name(), "attempts exhausted, archiving");
        ctx.queues.archive(priority, msg_id).await?;
    } else {
        let delay_secs = (5u64 << attempt.min(6)).min(300) as i32;
        ctx.queues
            .extend_visibility(priority, msg_id, delay_secs)
            .await?;
        info!(msg_id, attempt, delay_secs, "job rescheduled");
    }
    Ok(())
}

/// Startup housekeeping shared by worker processes: queue creation plus the
/// reapers for checkpoints, snapshots, and archived jobs.
pub async fn startup_maintenance(ctx: &WorkerContext) -> Result<()> {
    ctx.queues.ensure_queues().await?;
    let stale = ctx.state.reap_stale().await?;
    if stale > 0 {
        info!(stale, "reaped idle sync checkpoints");
    }
    let snapshots = progress::reap_snapshots(&ctx.db).await?;
    if snapshots > 0 {
        info!(snapshots, "reaped expired progress snapshots");
    }
    let purged = ctx.queues.purge_archives(ARCHIVE_RETENTION_HOURS).await?;
    if purged > 0 {
        info!(purged, "purged archived queue messages");
    }
    Ok(())
}

pub use state::{Checkpoint, SyncState};
pub use worker::{SyncSummary, WorkerContext};
