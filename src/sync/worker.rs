//! The sync worker: consumes jobs from the priority queues and drives one
//! library sync at a time through fetch → upsert → checkpoint → progress,
//! with classified failure handling, cancellation, and resume.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::models::{OperationStatus, SyncStatus};
use crate::catalog::{self, Db};
use crate::platforms::{AdapterError, PlatformAdapter};
use crate::queue::{EnrichJob, JobPayload, Priority, SyncJob, SyncQueues};
use crate::sync::progress::{CurrentGame, ProgressStatus, ProgressTracker};
use crate::sync::state::SyncState;

pub struct WorkerContext {
    pub db: Db,
    pub queues: SyncQueues,
    pub state: SyncState,
    pub adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    /// Upsert batch size; also the fetch page the worker requests.
    pub batch_size: usize,
    pub job_timeout: Duration,
    pub max_transient_retries: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub status: SyncStatus,
    pub games_processed: u64,
    pub games_added: u64,
    pub games_updated: u64,
    pub errors_count: u32,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub enum SyncOutcome {
    Finished(SyncSummary),
    /// Lock already held by a live sync and `force` not set; a no-op.
    AlreadySyncing,
}

/// Exponential backoff with full jitter: uniform in
/// [0, min(max, base * 2^attempt)].
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let cap = exp.min(max);
    if cap.is_zero() {
        return Duration::ZERO;
    }
    let jittered_ms = rand::thread_rng().gen_range(0..=cap.as_millis() as u64);
    Duration::from_millis(jittered_ms)
}

/// Run a fallible adapter call, retrying transient failures with jittered
/// backoff. Everything else propagates immediately.
async fn retry_transient<T, F, Fut>(
    ctx: &WorkerContext,
    what: &str,
    mut call: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AdapterError>>,
{
    let base = Duration::from_secs(1);
    let max = Duration::from_secs(60);
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(AdapterError::Transient(msg)) if attempt < ctx.max_transient_retries => {
                let delay = backoff_delay(attempt, base, max);
                warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %msg,
                    "transient platform error, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Execute one sync job to a terminal state. The returned summary mirrors
/// what was written to the operation log.
pub async fn run_sync_job(ctx: &WorkerContext, job: &SyncJob) -> Result<SyncOutcome> {
    let started = Instant::now();
    let library_id = job.library_id;

    // Lock gate. A held, unexpired lock means a live sync; force releases it
    // so the new job can take over (the old worker observes the loss at its
    // next pause check).
    if ctx.state.is_syncing(library_id).await? {
        if !job.force {
            info!(%library_id, "sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadySyncing);
        }
        SyncState::force_release_lock(&ctx.db, library_id).await?;
    }
    let lock_ttl = ctx.job_timeout.as_secs() + 60;
    if !ctx.state.acquire_lock(library_id, lock_ttl).await? {
        info!(%library_id, "lost lock race, skipping");
        return Ok(SyncOutcome::AlreadySyncing);
    }

    let library = match catalog::libraries::get_library(&ctx.db, library_id).await {
        Ok(lib) => lib,
        Err(e) => {
            ctx.state.release_lock(library_id).await?;
            return Err(anyhow!("loading library {library_id}: {e}"));
        }
    };
    let platform = catalog::platforms::get_platform(&ctx.db, library.platform_id)
        .await?
        .ok_or_else(|| anyhow!("platform {} missing", library.platform_id))?;

    let operation_id =
        catalog::sync_ops::record_sync_operation(&ctx.db, library_id, job.sync_type).await?;
    let mut tracker = ProgressTracker::start(
        ctx.db.clone(),
        operation_id,
        library_id,
        &platform.platform_code,
    )
    .await?;

    let Some(adapter) = ctx.adapters.get(&platform.platform_code).cloned() else {
        let msg = format!("no adapter for platform '{}'", platform.platform_code);
        finish_failed(ctx, &mut tracker, operation_id, library_id, &msg, 0, 0, 0).await?;
        ctx.state.release_lock(library_id).await?;
        return Ok(SyncOutcome::Finished(summary(
            SyncStatus::Failed,
            0,
            0,
            0,
            1,
            started,
        )));
    };

    match sync_library(ctx, &mut tracker, operation_id, &library, adapter.as_ref(), job).await {
        Ok(s) => Ok(SyncOutcome::Finished(s)),
        Err(e) => {
            // Unclassified internal failure (store errors and the like);
            // leave the checkpoint for resume and surface the failure.
            let msg = format!("internal sync error: {e}");
            error!(%library_id, %operation_id, error = %e, "sync job failed internally");
            let _ = finish_failed(ctx, &mut tracker, operation_id, library_id, &msg, 0, 0, 0).await;
            ctx.state.release_lock(library_id).await?;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn sync_library(
    ctx: &WorkerContext,
    tracker: &mut ProgressTracker,
    operation_id: Uuid,
    library: &catalog::models::UserLibrary,
    adapter: &dyn PlatformAdapter,
    job: &SyncJob,
) -> Result<SyncSummary> {
    let started = Instant::now();
    let library_id = library.library_id;
    let lock_ttl = ctx.job_timeout.as_secs() + 60;

    // Canonicalize the user id once (vanity names resolve to stable ids) and
    // open or resume the checkpoint under that identity.
    let user = match adapter.resolve_user(&library.user_identifier).await {
        Ok(u) => u,
        Err(err) => {
            return handle_adapter_failure(ctx, tracker, operation_id, library_id, job, err, 0, 0, 0, started)
                .await;
        }
    };
    let checkpoint = ctx
        .state
        .load_or_init(library_id, adapter.platform_code(), &user)
        .await?;
    ctx.state
        .set_status(library_id, SyncStatus::InProgress, None)
        .await?;

    let total = match retry_transient(ctx, "count_games", || adapter.count_games(&user)).await {
        Ok(n) => n,
        Err(err) => {
            return handle_adapter_failure(ctx, tracker, operation_id, library_id, job, err, 0, 0, 0, started)
                .await;
        }
    };

    let mut offset = checkpoint.last_offset.max(0) as u64;
    let mut processed = checkpoint.games_synced.max(0) as u64;
    let mut added = 0u64;
    let mut updated = 0u64;
    let mut errors_count = 0u32;

    while offset < total {
        let limit = ctx.batch_size as u64;
        let batch = match retry_transient(ctx, "fetch_batch", || {
            adapter.fetch_batch(&user, offset, limit)
        })
        .await
        {
            Ok(b) => b,
            Err(err) => {
                return handle_adapter_failure(
                    ctx, tracker, operation_id, library_id, job, err, processed, added, updated,
                    started,
                )
                .await;
            }
        };
        if batch.is_empty() {
            // Remote library shrank under us; finish with what we have.
            break;
        }

        let outcome = catalog::games::upsert_games_batch(&ctx.db, library_id, &batch)
            .await
            .map_err(|e| anyhow!("batch upsert failed: {e}"))?;
        for regression in &outcome.regressions {
            errors_count += 1;
            tracker.note_error(format!(
                "playtime regression on '{}': {} -> {} minutes",
                regression.title, regression.previous_minutes, regression.reported_minutes
            ));
            catalog::sync_ops::append_operation_log(
                &ctx.db,
                operation_id,
                json!({
                    "event": "playtime_regression",
                    "game_id": regression.game_id,
                    "previous_minutes": regression.previous_minutes,
                    "reported_minutes": regression.reported_minutes,
                }),
            )
            .await?;
        }

        let batch_len = batch.len() as u64;
        offset += batch_len;
        processed += batch_len;
        added += outcome.counts.added as u64;
        updated += outcome.counts.updated as u64;

        ctx.state
            .update_offset(library_id, offset as i64, processed as i64)
            .await?;
        ctx.state.renew_lock(library_id, lock_ttl).await?;

        let current = batch.last().map(|g| CurrentGame {
            title: g.title.clone(),
            platform_game_id: g.platform_game_id.clone(),
        });
        tracker
            .update(batch_len as u32, processed, Some(total), added, updated, current)
            .await?;
        catalog::sync_ops::update_sync_operation(
            &ctx.db,
            operation_id,
            OperationStatus::InProgress,
            processed as u32,
            added as u32,
            updated as u32,
            errors_count,
        )
        .await?;

        // Cancellation check at every batch boundary: lock deleted, lock
        // stolen, or process draining.
        if ctx.state.should_pause(library_id).await? {
            info!(%library_id, %operation_id, offset, "sync pause requested, cancelling");
            catalog::sync_ops::update_sync_operation(
                &ctx.db,
                operation_id,
                OperationStatus::Cancelled,
                processed as u32,
                added as u32,
                updated as u32,
                errors_count,
            )
            .await?;
            ctx.state
                .set_status(library_id, SyncStatus::Cancelled, None)
                .await?;
            tracker
                .finish(
                    ProgressStatus::Cancelled,
                    processed,
                    Some(total),
                    added,
                    updated,
                    "sync cancelled",
                )
                .await?;
            // Checkpoint retained for resume; release only our own hold (a
            // stolen lock belongs to the new worker).
            ctx.state.release_lock(library_id).await?;
            return Ok(summary(
                SyncStatus::Cancelled,
                processed,
                added,
                updated,
                errors_count,
                started,
            ));
        }
    }

    // Finalize.
    catalog::sync_ops::update_sync_operation(
        &ctx.db,
        operation_id,
        OperationStatus::Completed,
        processed as u32,
        added as u32,
        updated as u32,
        errors_count,
    )
    .await?;
    ctx.state
        .set_status(library_id, SyncStatus::Completed, None)
        .await?;
    ctx.state.clear(library_id).await?;
    tracker
        .finish(
            ProgressStatus::Completed,
            processed,
            Some(total),
            added,
            updated,
            "sync completed",
        )
        .await?;
    ctx.state.release_lock(library_id).await?;
    info!(%library_id, %operation_id, processed, added, updated, "sync completed");
    Ok(summary(
        SyncStatus::Completed,
        processed,
        added,
        updated,
        errors_count,
        started,
    ))
}

/// Terminal handling for a classified adapter failure, per kind.
#[allow(clippy::too_many_arguments)]
async fn handle_adapter_failure(
    ctx: &WorkerContext,
    tracker: &mut ProgressTracker,
    operation_id: Uuid,
    library_id: Uuid,
    job: &SyncJob,
    err: AdapterError,
    processed: u64,
    added: u64,
    updated: u64,
    started: Instant,
) -> Result<SyncSummary> {
    match err {
        AdapterError::RateLimited { retry_after_secs } => {
            warn!(%library_id, retry_after_secs, "platform rate limited, deferring");
            // Store the retry hint in the checkpoint, mirror the status, and
            // hand the job to the low queue with a not-before delay.
            if let Some(mut cp) = ctx.state.load(library_id).await? {
                cp.status = SyncStatus::RateLimited;
                cp.retry_after_secs = Some(retry_after_secs as i64);
                ctx.state.save(&cp).await?;
            }
            ctx.state
                .set_status(library_id, SyncStatus::RateLimited, Some("platform rate limited"))
                .await?;
            catalog::sync_ops::update_sync_operation(
                &ctx.db,
                operation_id,
                OperationStatus::Failed,
                processed as u32,
                added as u32,
                updated as u32,
                1,
            )
            .await?;
            catalog::sync_ops::set_operation_error(
                &ctx.db,
                operation_id,
                &format!("rate limited, retry after {retry_after_secs}s"),
            )
            .await?;
            tracker
                .finish(
                    ProgressStatus::RateLimited,
                    processed,
                    None,
                    added,
                    updated,
                    "platform rate limited, sync deferred",
                )
                .await?;
            crate::sync::progress::notify_library_event(
                &ctx.db,
                "rate_limit_warning",
                library_id,
                json!({ "retry_after": retry_after_secs }),
            )
            .await?;
            let requeued = SyncJob {
                force: false,
                ..job.clone()
            };
            ctx.queues
                .enqueue(Priority::Low, &JobPayload::Sync(requeued), retry_after_secs)
                .await?;
            ctx.state.release_lock(library_id).await?;
            Ok(summary(
                SyncStatus::RateLimited,
                processed,
                added,
                updated,
                1,
                started,
            ))
        }
        AdapterError::Auth(_) | AdapterError::NotFound(_) | AdapterError::Permanent(_)
        | AdapterError::Transient(_) => {
            // Transient only lands here after the retry budget is spent.
            let msg = format!("{} ({})", err, err.code());
            finish_failed(
                ctx, tracker, operation_id, library_id, &msg, processed, added, updated,
            )
            .await?;
            ctx.state.release_lock(library_id).await?;
            Ok(summary(
                SyncStatus::Failed,
                processed,
                added,
                updated,
                1,
                started,
            ))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn finish_failed(
    ctx: &WorkerContext,
    tracker: &mut ProgressTracker,
    operation_id: Uuid,
    library_id: Uuid,
    message: &str,
    processed: u64,
    added: u64,
    updated: u64,
) -> Result<()> {
    catalog::sync_ops::update_sync_operation(
        &ctx.db,
        operation_id,
        OperationStatus::Failed,
        processed as u32,
        added as u32,
        updated as u32,
        1,
    )
    .await?;
    catalog::sync_ops::set_operation_error(&ctx.db, operation_id, message).await?;
    ctx.state
        .set_status(library_id, SyncStatus::Failed, Some(message))
        .await?;
    tracker.note_error(message.to_string());
    tracker
        .finish(ProgressStatus::Failed, processed, None, added, updated, message)
        .await?;
    Ok(())
}

fn summary(
    status: SyncStatus,
    processed: u64,
    added: u64,
    updated: u64,
    errors_count: u32,
    started: Instant,
) -> SyncSummary {
    SyncSummary {
        status,
        games_processed: processed,
        games_added: added,
        games_updated: updated,
        errors_count,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Low-priority enrichment: pull store metadata and achievements for every
/// game in the library that the main sync linked.
pub async fn run_enrich_job(ctx: &WorkerContext, job: &EnrichJob) -> Result<()> {
    let library = catalog::libraries::get_library(&ctx.db, job.library_id)
        .await
        .map_err(|e| anyhow!("loading library: {e}"))?;
    let platform = catalog::platforms::get_platform(&ctx.db, library.platform_id)
        .await?
        .ok_or_else(|| anyhow!("platform {} missing", library.platform_id))?;
    let Some(adapter) = ctx.adapters.get(&platform.platform_code).cloned() else {
        return Ok(());
    };
    let user = adapter
        .resolve_user(&library.user_identifier)
        .await
        .map_err(|e| anyhow!("resolving user: {e}"))?;

    let rows: Vec<(Uuid, Uuid, Option<String>)> = sqlx::query_as(
        "SELECT user_game_id, game_id, platform_game_id
           FROM user_games WHERE library_id = $1",
    )
    .persistent(false)
    .bind(job.library_id)
    .fetch_all(&ctx.db.pool)
    .await?;

    for (user_game_id, game_id, platform_game_id) in rows {
        let Some(pgid) = platform_game_id else { continue };
        if ctx.state.shutting_down() {
            break;
        }
        match adapter.game_details(&pgid).await {
            Ok(Some(details)) => {
                catalog::games::enrich_game(&ctx.db, game_id, &details).await?;
            }
            Ok(None) => {}
            Err(AdapterError::RateLimited { retry_after_secs }) => {
                // Re-enqueue the remainder after the hint; enrichment is
                // idempotent so restarting from the top is fine.
                ctx.queues
                    .enqueue(
                        Priority::Low,
                        &JobPayload::Enrich(job.clone()),
                        retry_after_secs,
                    )
                    .await?;
                return Ok(());
            }
            Err(err) => {
                warn!(%game_id, error = %err, "enrichment fetch failed, skipping game");
                continue;
            }
        }
        match adapter.game_achievements(&pgid).await {
            Ok(defs) if !defs.is_empty() => {
                catalog::achievements::upsert_game_achievements(
                    &ctx.db,
                    game_id,
                    library.platform_id,
                    &defs,
                )
                .await?;
                if let Ok(unlocks) = adapter.user_achievements(&user, &pgid).await {
                    let newly = catalog::achievements::upsert_user_achievements(
                        &ctx.db,
                        user_game_id,
                        game_id,
                        library.platform_id,
                        &unlocks,
                    )
                    .await?;
                    if newly > 0 {
                        crate::sync::progress::notify_library_event(
                            &ctx.db,
                            "achievement_unlocked",
                            job.library_id,
                            serde_json::json!({ "game_id": game_id, "unlocked": newly }),
                        )
                        .await?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded_and_grows() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);
        for attempt in 0..10 {
            let d = backoff_delay(attempt, base, max);
            let cap = base.saturating_mul(1 << attempt.min(16)).min(max);
            assert!(d <= cap, "attempt {attempt}: {d:?} > {cap:?}");
        }
        // Attempt 10 caps at max regardless of the exponent.
        assert!(backoff_delay(10, base, max) <= max);
    }

    #[test]
    fn summary_reflects_counters() {
        let s = summary(SyncStatus::Completed, 250, 10, 5, 0, Instant::now());
        assert_eq!(s.games_processed, 250);
        assert!(s.games_added + s.games_updated <= s.games_processed);
    }
}
