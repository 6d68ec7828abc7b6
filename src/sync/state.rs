//! Per-library sync checkpoint, lock, and cancellation signal. The lock and
//! the checkpoint are separate rows: deleting the lock while a sync runs is
//! the cancellation API, the checkpoint is what makes the sync resumable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::libraries;
use crate::catalog::models::SyncStatus;
use crate::catalog::Db;

/// Checkpoints idle longer than this are reaped.
const CHECKPOINT_MAX_IDLE_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Checkpoint {
    pub library_id: Uuid,
    pub platform_code: String,
    pub user_identifier: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_offset: i64,
    pub games_synced: i64,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub retry_after_secs: Option<i64>,
}

#[derive(Clone)]
pub struct SyncState {
    db: Db,
    /// Identity written into lock rows; only the holder may renew or advance.
    holder: String,
    shutdown: Arc<AtomicBool>,
}

impl SyncState {
    pub fn new(db: Db, shutdown: Arc<AtomicBool>) -> Self {
        let holder = format!(
            "{}-{}-{}",
            hostname(),
            std::process::id(),
            &Uuid::new_v4().to_string()[..8]
        );
        Self {
            db,
            holder,
            shutdown,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn is_syncing(&self, library_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM sync_locks WHERE library_id = $1 AND expires_at > now()",
        )
        .persistent(false)
        .bind(library_id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Single-statement conditional acquisition: succeeds when no lock row
    /// exists or the existing one has expired (stale-holder takeover).
    pub async fn acquire_lock(&self, library_id: Uuid, ttl_secs: u64) -> Result<bool> {
        let row = sqlx::query(
            "INSERT INTO sync_locks (library_id, holder, acquired_at, expires_at)
             VALUES ($1, $2, now(), now() + make_interval(secs => $3))
             ON CONFLICT (library_id) DO UPDATE SET
                 holder = EXCLUDED.holder,
                 acquired_at = now(),
                 expires_at = EXCLUDED.expires_at
             WHERE sync_locks.expires_at < now()
             RETURNING holder",
        )
        .persistent(false)
        .bind(library_id)
        .bind(&self.holder)
        .bind(ttl_secs as f64)
        .fetch_optional(&self.db.pool)
        .await?;
        let acquired = row.is_some();
        if acquired {
            debug!(%library_id, holder = %self.holder, "sync lock acquired");
        }
        Ok(acquired)
    }

    /// Heartbeat; a false return means the lock was lost (deleted or stolen
    /// after expiry) and the job must stop at the next boundary.
    pub async fn renew_lock(&self, library_id: Uuid, ttl_secs: u64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE sync_locks
                SET expires_at = now() + make_interval(secs => $3)
              WHERE library_id = $1 AND holder = $2",
        )
        .persistent(false)
        .bind(library_id)
        .bind(&self.holder)
        .bind(ttl_secs as f64)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Holder-scoped release on normal completion.
    pub async fn release_lock(&self, library_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sync_locks WHERE library_id = $1 AND holder = $2")
            .persistent(false)
            .bind(library_id)
            .bind(&self.holder)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    /// Unconditional release: the cancellation API (operators, the HTTP
    /// cancel endpoint, and force-sync all call this).
    pub async fn force_release_lock(db: &Db, library_id: Uuid) -> Result<bool> {
        let res = sqlx::query("DELETE FROM sync_locks WHERE library_id = $1")
            .persistent(false)
            .bind(library_id)
            .execute(&db.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// True when the lock vanished or changed hands while we were syncing,
    /// or the process is draining. Polled at every batch boundary.
    pub async fn should_pause(&self, library_id: Uuid) -> Result<bool> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Ok(true);
        }
        let row = sqlx::query("SELECT holder FROM sync_locks WHERE library_id = $1")
            .persistent(false)
            .bind(library_id)
            .fetch_optional(&self.db.pool)
            .await?;
        match row {
            Some(r) => Ok(r.get::<String, _>("holder") != self.holder),
            None => Ok(true),
        }
    }

    pub fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Resume point if one exists, otherwise a fresh checkpoint.
    pub async fn load_or_init(
        &self,
        library_id: Uuid,
        platform_code: &str,
        user_identifier: &str,
    ) -> Result<Checkpoint> {
        if let Some(existing) = self.load(library_id).await? {
            info!(%library_id, offset = existing.last_offset, "resuming from checkpoint");
            return Ok(existing);
        }
        let cp = sqlx::query_as::<_, Checkpoint>(
            "INSERT INTO sync_checkpoints (library_id, platform_code, user_identifier, status)
             VALUES ($1, $2, $3, 'in_progress')
             ON CONFLICT (library_id) DO UPDATE SET
                 platform_code = EXCLUDED.platform_code,
                 user_identifier = EXCLUDED.user_identifier,
                 updated_at = now()
             RETURNING *",
        )
        .persistent(false)
        .bind(library_id)
        .bind(platform_code)
        .bind(user_identifier)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(cp)
    }

    pub async fn load(&self, library_id: Uuid) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, Checkpoint>(
            "SELECT * FROM sync_checkpoints WHERE library_id = $1",
        )
        .persistent(false)
        .bind(library_id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    pub async fn save(&self, cp: &Checkpoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_checkpoints
                 (library_id, platform_code, user_identifier, started_at, updated_at,
                  last_offset, games_synced, status, error, retry_after_secs)
             VALUES ($1, $2, $3, $4, now(), $5, $6, $7, $8, $9)
             ON CONFLICT (library_id) DO UPDATE SET
                 updated_at = now(),
                 last_offset = EXCLUDED.last_offset,
                 games_synced = EXCLUDED.games_synced,
                 status = EXCLUDED.status,
                 error = EXCLUDED.error,
                 retry_after_secs = EXCLUDED.retry_after_secs",
        )
        .persistent(false)
        .bind(cp.library_id)
        .bind(&cp.platform_code)
        .bind(&cp.user_identifier)
        .bind(cp.started_at)
        .bind(cp.last_offset)
        .bind(cp.games_synced)
        .bind(cp.status)
        .bind(&cp.error)
        .bind(cp.retry_after_secs)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    /// Advance the resume offset after a committed batch.
    pub async fn update_offset(&self, library_id: Uuid, offset: i64, games_synced: i64) -> Result<()> {
        sqlx::query(
            "UPDATE sync_checkpoints
                SET last_offset = $2, games_synced = $3, updated_at = now()
              WHERE library_id = $1",
        )
        .persistent(false)
        .bind(library_id)
        .bind(offset)
        .bind(games_synced)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    /// Status transition, mirrored into the library row so clients polling
    /// the catalog see the same state as the sync engine.
    pub async fn set_status(
        &self,
        library_id: Uuid,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sync_checkpoints
                SET status = $2, error = $3, updated_at = now()
              WHERE library_id = $1",
        )
        .persistent(false)
        .bind(library_id)
        .bind(status)
        .bind(error)
        .execute(&self.db.pool)
        .await?;
        libraries::set_sync_status(&self.db, library_id, status, error)
            .await
            .map_err(|e| anyhow::anyhow!("mirroring sync status: {e}"))?;
        Ok(())
    }

    /// Completed syncs start over from zero next time.
    pub async fn clear(&self, library_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sync_checkpoints WHERE library_id = $1")
            .persistent(false)
            .bind(library_id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    /// Reaper for checkpoints idle past their lifetime; run on worker start.
    pub async fn reap_stale(&self) -> Result<u64> {
        let res = sqlx::query(
            "DELETE FROM sync_checkpoints
              WHERE updated_at < now() - make_interval(days => $1)",
        )
        .persistent(false)
        .bind(CHECKPOINT_MAX_IDLE_DAYS as i32)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

/// Lock check for callers outside the worker (the HTTP conflict gate).
pub async fn library_locked(db: &Db, library_id: Uuid) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM sync_locks WHERE library_id = $1 AND expires_at > now()")
        .persistent(false)
        .bind(library_id)
        .fetch_optional(&db.pool)
        .await?;
    Ok(row.is_some())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_serde_round_trip() {
        let cp = Checkpoint {
            library_id: Uuid::new_v4(),
            platform_code: "steam".into(),
            user_identifier: "76561198000000000".into(),
            started_at: Utc::now(),
            updated_at: Utc::now(),
            last_offset: 100,
            games_synced: 100,
            status: SyncStatus::RateLimited,
            error: Some("upstream 429".into()),
            retry_after_secs: Some(120),
        };
        let encoded = serde_json::to_string(&cp).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.library_id, cp.library_id);
        assert_eq!(decoded.last_offset, 100);
        assert_eq!(decoded.status, SyncStatus::RateLimited);
        assert_eq!(decoded.retry_after_secs, Some(120));
    }
}
