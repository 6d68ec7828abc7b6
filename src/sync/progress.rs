//! Structured progress events: published to the realtime bus via the
//! Postgres notify channel and mirrored to a per-library snapshot for
//! polling clients.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::catalog::Db;

/// LISTEN/NOTIFY channel the realtime bridge subscribes to.
pub const PROGRESS_CHANNEL: &str = "sync_progress";

/// Snapshots older than this are dropped by the reaper; reconnecting clients
/// fall back to the library row.
const SNAPSHOT_TTL_SECS: i64 = 3600;

/// Publish at most every N games or every T, whichever comes first.
const CADENCE_GAMES: u32 = 10;
const CADENCE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Starting,
    Syncing,
    Completed,
    Failed,
    RateLimited,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressStatus::Completed
                | ProgressStatus::Failed
                | ProgressStatus::RateLimited
                | ProgressStatus::Cancelled
        )
    }

    /// Realtime event type carried on the wire for this status.
    pub fn event_type(self) -> &'static str {
        match self {
            ProgressStatus::Starting => "sync_started",
            ProgressStatus::Syncing => "sync_progress",
            ProgressStatus::Completed => "sync_completed",
            ProgressStatus::Failed => "sync_failed",
            ProgressStatus::RateLimited => "sync_rate_limited",
            ProgressStatus::Cancelled => "sync_cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentGame {
    pub title: String,
    pub platform_game_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub operation_id: Uuid,
    pub library_id: Uuid,
    pub platform: String,
    pub status: ProgressStatus,
    pub progress_percentage: u8,
    pub games_processed: u64,
    pub games_total: Option<u64>,
    pub games_added: u64,
    pub games_updated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_game: Option<CurrentGame>,
    /// Processing throughput since the operation started; absent until a
    /// full second has elapsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_per_minute: Option<u64>,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub errors: Vec<String>,
    /// Per-operation publisher sequence; subscribers can rely on it being
    /// strictly increasing until a terminal event.
    pub seq: u64,
}

/// Decides when an update is worth publishing. Pure state machine so the
/// cadence is testable without a clock or a database.
#[derive(Debug)]
struct CadenceGate {
    last_publish: Instant,
    games_since: u32,
}

impl CadenceGate {
    fn new() -> Self {
        Self {
            last_publish: Instant::now(),
            games_since: 0,
        }
    }

    fn note_games(&mut self, n: u32) {
        self.games_since += n;
    }

    fn should_publish(&self, now: Instant) -> bool {
        self.games_since >= CADENCE_GAMES || now.duration_since(self.last_publish) >= CADENCE_INTERVAL
    }

    fn mark_published(&mut self, now: Instant) {
        self.last_publish = now;
        self.games_since = 0;
    }
}

pub struct ProgressTracker {
    db: Db,
    operation_id: Uuid,
    library_id: Uuid,
    platform: String,
    started_at: DateTime<Utc>,
    seq: u64,
    last_percent: u8,
    gate: CadenceGate,
    errors: Vec<String>,
}

impl ProgressTracker {
    /// Build the tracker and flush the `starting` event immediately.
    pub async fn start(
        db: Db,
        operation_id: Uuid,
        library_id: Uuid,
        platform: &str,
    ) -> Result<Self> {
        let mut tracker = Self {
            db,
            operation_id,
            library_id,
            platform: platform.to_string(),
            started_at: Utc::now(),
            seq: 0,
            last_percent: 0,
            gate: CadenceGate::new(),
            errors: Vec::new(),
        };
        let event = tracker.build(ProgressStatus::Starting, 0, None, 0, 0, None, "sync starting");
        tracker.publish(&event).await?;
        Ok(tracker)
    }

    pub fn note_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Batch-boundary update; respects the publish cadence.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &mut self,
        games_in_batch: u32,
        processed: u64,
        total: Option<u64>,
        added: u64,
        updated: u64,
        current: Option<CurrentGame>,
    ) -> Result<()> {
        self.gate.note_games(games_in_batch);
        let now = Instant::now();
        if !self.gate.should_publish(now) {
            return Ok(());
        }
        let event = self.build(
            ProgressStatus::Syncing,
            processed,
            total,
            added,
            updated,
            current,
            "syncing",
        );
        self.publish(&event).await?;
        self.gate.mark_published(now);
        Ok(())
    }

    /// Terminal transition; always flushes regardless of cadence.
    pub async fn finish(
        &mut self,
        status: ProgressStatus,
        processed: u64,
        total: Option<u64>,
        added: u64,
        updated: u64,
        message: &str,
    ) -> Result<()> {
        let event = self.build(status, processed, total, added, updated, None, message);
        self.publish(&event).await
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &mut self,
        status: ProgressStatus,
        processed: u64,
        total: Option<u64>,
        added: u64,
        updated: u64,
        current: Option<CurrentGame>,
        message: &str,
    ) -> ProgressEvent {
        self.seq += 1;
        let computed = match (status, total) {
            (ProgressStatus::Completed, _) => 100,
            (_, Some(total)) if total > 0 => ((processed * 100) / total).min(100) as u8,
            _ => 0,
        };
        // Never step backwards within one operation, even if totals shift.
        self.last_percent = self.last_percent.max(computed);
        let elapsed_secs = (Utc::now() - self.started_at).num_seconds();
        let rate_per_minute = if elapsed_secs > 0 && processed > 0 {
            Some(processed * 60 / elapsed_secs as u64)
        } else {
            None
        };
        ProgressEvent {
            operation_id: self.operation_id,
            library_id: self.library_id,
            platform: self.platform.clone(),
            status,
            progress_percentage: self.last_percent,
            games_processed: processed,
            games_total: total,
            games_added: added,
            games_updated: updated,
            current_game: current,
            rate_per_minute,
            message: message.to_string(),
            started_at: self.started_at,
            updated_at: Utc::now(),
            errors: self.errors.clone(),
            seq: self.seq,
        }
    }

    /// Mirror the snapshot for polling and fan the event out through NOTIFY.
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        sqlx::query(
            "INSERT INTO sync_progress (library_id, payload, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (library_id) DO UPDATE SET
                 payload = EXCLUDED.payload, updated_at = now()",
        )
        .persistent(false)
        .bind(event.library_id)
        .bind(&payload)
        .execute(&self.db.pool)
        .await?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .persistent(false)
            .bind(PROGRESS_CHANNEL)
            .bind(payload.to_string())
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }
}

/// Fire a catalog-side event (game_added, achievement_unlocked,
/// rate_limit_warning, ...) onto the bus's library channel.
pub async fn notify_library_event(
    db: &Db,
    event_type: &str,
    library_id: Uuid,
    data: serde_json::Value,
) -> Result<()> {
    let payload = serde_json::json!({
        "type": event_type,
        "library_id": library_id,
        "data": data,
    });
    sqlx::query("SELECT pg_notify($1, $2)")
        .persistent(false)
        .bind(crate::realtime::listener::LIBRARY_CHANNEL)
        .bind(payload.to_string())
        .execute(&db.pool)
        .await?;
    Ok(())
}

/// Latest snapshot for a library within the TTL, for the polling endpoint.
pub async fn latest_snapshot(db: &Db, library_id: Uuid) -> Result<Option<ProgressEvent>> {
    let row = sqlx::query(
        "SELECT payload FROM sync_progress
          WHERE library_id = $1
            AND updated_at > now() - make_interval(secs => $2)",
    )
    .persistent(false)
    .bind(library_id)
    .bind(SNAPSHOT_TTL_SECS as f64)
    .fetch_optional(&db.pool)
    .await?;
    match row {
        Some(r) => {
            let payload: serde_json::Value = r.get("payload");
            Ok(serde_json::from_value(payload).ok())
        }
        None => Ok(None),
    }
}

/// Drop expired snapshots; run periodically by the worker.
pub async fn reap_snapshots(db: &Db) -> Result<u64> {
    let res = sqlx::query(
        "DELETE FROM sync_progress WHERE updated_at < now() - make_interval(secs => $1)",
    )
    .persistent(false)
    .bind(SNAPSHOT_TTL_SECS as f64)
    .execute(&db.pool)
    .await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_publishes_on_game_count() {
        let mut gate = CadenceGate::new();
        let now = gate.last_publish;
        gate.note_games(9);
        assert!(!gate.should_publish(now));
        gate.note_games(1);
        assert!(gate.should_publish(now));
        gate.mark_published(now);
        assert!(!gate.should_publish(now));
    }

    #[test]
    fn cadence_publishes_on_elapsed_time() {
        let mut gate = CadenceGate::new();
        let now = gate.last_publish;
        gate.note_games(1);
        assert!(!gate.should_publish(now + Duration::from_millis(1900)));
        assert!(gate.should_publish(now + Duration::from_secs(2)));
    }

    #[test]
    fn percent_is_monotonic_even_when_total_shrinks() {
        // The guard in build() is last_percent.max(computed); replay the
        // arithmetic over a shrinking total.
        let mut last = 0u8;
        for (processed, total) in [(50u64, Some(100u64)), (60, Some(200)), (70, Some(100))] {
            let computed = match total {
                Some(t) if t > 0 => ((processed * 100) / t).min(100) as u8,
                _ => 0,
            };
            last = last.max(computed);
        }
        assert_eq!(last, 70);
    }

    #[test]
    fn wire_shape_uses_progress_percentage() {
        let event = ProgressEvent {
            operation_id: Uuid::new_v4(),
            library_id: Uuid::new_v4(),
            platform: "steam".into(),
            status: ProgressStatus::Syncing,
            progress_percentage: 45,
            games_processed: 89,
            games_total: Some(198),
            games_added: 3,
            games_updated: 12,
            current_game: Some(CurrentGame {
                title: "The Witcher 3: Wild Hunt".into(),
                platform_game_id: "292030".into(),
            }),
            rate_per_minute: Some(18),
            message: "syncing".into(),
            started_at: Utc::now(),
            updated_at: Utc::now(),
            errors: vec![],
            seq: 9,
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["progress_percentage"], 45);
        assert_eq!(wire["rate_per_minute"], 18);
        assert_eq!(wire["current_game"]["platform_game_id"], "292030");
        assert!(wire.get("progress_percent").is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(ProgressStatus::Completed.is_terminal());
        assert!(ProgressStatus::RateLimited.is_terminal());
        assert!(!ProgressStatus::Syncing.is_terminal());
        assert_eq!(ProgressStatus::RateLimited.event_type(), "sync_rate_limited");
    }
}
