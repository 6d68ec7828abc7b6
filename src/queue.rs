//! Persistent priority work queue over the pgmq extension. Three queues in
//! strict priority order; FIFO within a queue is pgmq's read order. Archive
//! tables double as the result/failure retention window.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::catalog::models::OperationType;
use crate::catalog::Db;

/// Wake channel fired on every enqueue so idle workers pick jobs up without
/// tight polling.
pub const WAKE_CHANNEL: &str = "sync_jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Default,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Default, Priority::Low];

    pub fn queue_name(self) -> &'static str {
        match self {
            Priority::High => "sync_high",
            Priority::Default => "sync_default",
            Priority::Low => "sync_low",
        }
    }

    /// Manual jobs are not retried (the user will); scheduled and enrichment
    /// jobs get progressively more patience.
    pub fn max_attempts(self) -> u32 {
        match self {
            Priority::High => 1,
            Priority::Default => 3,
            Priority::Low => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub job_id: Uuid,
    pub library_id: Uuid,
    pub force: bool,
    pub sync_type: OperationType,
    pub enqueued_at: DateTime<Utc>,
    pub correlation_id: String,
}

impl SyncJob {
    pub fn new(library_id: Uuid, force: bool, sync_type: OperationType) -> Self {
        let job_id = Uuid::new_v4();
        Self {
            job_id,
            library_id,
            force,
            sync_type,
            enqueued_at: Utc::now(),
            correlation_id: format!("sync-{job_id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichJob {
    pub job_id: Uuid,
    pub library_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

/// Queue envelope. Tagged so new job families can ride the same queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Sync(SyncJob),
    Enrich(EnrichJob),
}

impl JobPayload {
    pub fn library_id(&self) -> Uuid {
        match self {
            JobPayload::Sync(j) => j.library_id,
            JobPayload::Enrich(j) => j.library_id,
        }
    }
}

#[derive(Debug)]
pub struct PoppedJob {
    pub msg_id: i64,
    pub read_ct: i32,
    pub priority: Priority,
    pub payload: JobPayload,
}

#[derive(Clone)]
pub struct SyncQueues {
    db: Db,
    vt_secs: i32,
}

impl SyncQueues {
    pub fn new(db: Db) -> Self {
        let vt_secs = crate::util::env::env_parse("SYNC_QUEUE_VT_SECS", 60i32).max(1);
        Self { db, vt_secs }
    }

    pub fn visibility_timeout_secs(&self) -> i32 {
        self.vt_secs
    }

    pub async fn ensure_queues(&self) -> Result<()> {
        // PGMQ's create() is not fully idempotent: it re-adds the queue
        // relations to the extension and errors when the sequence/table
        // already belongs to it. Detect existing queue relations and only
        // call create() when they are missing.
        for priority in Priority::ALL {
            let q_name = format!("q_{}", priority.queue_name());
            let a_name = format!("a_{}", priority.queue_name());
            let exists: bool = sqlx::query_scalar(
                "select exists (
                     select 1
                     from pg_class c
                     join pg_namespace n on n.oid = c.relnamespace
                     where c.relkind = 'r' and n.nspname = 'pgmq'
                       and c.relname in ($1, $2)
                 )",
            )
            .persistent(false)
            .bind(&q_name)
            .bind(&a_name)
            .fetch_one(&self.db.pool)
            .await?;

            if !exists {
                sqlx::query("SELECT pgmq.\"create\"($1)")
                    .persistent(false)
                    .bind(priority.queue_name())
                    .execute(&self.db.pool)
                    .await
                    .with_context(|| format!("creating queue {}", priority.queue_name()))?;
            }
        }
        Ok(())
    }

    /// Enqueue with an optional not-before delay (rate-limit deferral maps
    /// straight onto pgmq's delay argument). Fires the wake channel.
    pub async fn enqueue(
        &self,
        priority: Priority,
        payload: &JobPayload,
        delay_secs: u64,
    ) -> Result<i64> {
        let body = serde_json::to_value(payload)?;
        let msg_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2, $3) AS msg_id")
            .persistent(false)
            .bind(priority.queue_name())
            .bind(&body)
            .bind(delay_secs as i32)
            .fetch_one(&self.db.pool)
            .await?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .persistent(false)
            .bind(WAKE_CHANNEL)
            .bind(priority.queue_name())
            .execute(&self.db.pool)
            .await?;
        Ok(msg_id)
    }

    /// Pop one job, scanning queues in descending priority. The read sets
    /// the visibility timeout; the worker heartbeats it while running.
    pub async fn dequeue(&self) -> Result<Option<PoppedJob>> {
        for priority in Priority::ALL {
            let row = sqlx::query(
                "SELECT msg_id, read_ct, message FROM pgmq.read($1, $2, 1)",
            )
            .persistent(false)
            .bind(priority.queue_name())
            .bind(self.vt_secs)
            .fetch_optional(&self.db.pool)
            .await?;
            if let Some(row) = row {
                let msg_id: i64 = row.get("msg_id");
                let read_ct: i32 = row.get("read_ct");
                let message: serde_json::Value = row.get("message");
                match serde_json::from_value::<JobPayload>(message) {
                    Ok(payload) => {
                        return Ok(Some(PoppedJob {
                            msg_id,
                            read_ct,
                            priority,
                            payload,
                        }));
                    }
                    Err(err) => {
                        // Poison message; park it in the archive rather than
                        // letting it clog the queue head.
                        tracing::error!(msg_id, queue = priority.queue_name(), error = %err,
                            "undecodable job payload, archiving");
                        self.archive(priority, msg_id).await?;
                    }
                }
            }
        }
        Ok(None)
    }

    pub async fn complete(&self, priority: Priority, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .persistent(false)
            .bind(priority.queue_name())
            .bind(msg_id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    pub async fn archive(&self, priority: Priority, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .persistent(false)
            .bind(priority.queue_name())
            .bind(msg_id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    /// Push the message's visibility timeout out; used both as the running
    /// heartbeat and for retry rescheduling.
    pub async fn extend_visibility(
        &self,
        priority: Priority,
        msg_id: i64,
        vt_secs: i32,
    ) -> Result<()> {
        sqlx::query("SELECT pgmq.set_vt($1, $2, $3)")
            .persistent(false)
            .bind(priority.queue_name())
            .bind(msg_id)
            .bind(vt_secs)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    /// Drop archived messages older than the retention window (24 h).
    pub async fn purge_archives(&self, retention_hours: i64) -> Result<u64> {
        let mut purged = 0u64;
        for priority in Priority::ALL {
            let table = format!("pgmq.a_{}", priority.queue_name());
            let res = sqlx::query(&format!(
                "DELETE FROM {table} WHERE archived_at < now() - make_interval(hours => $1)"
            ))
            .persistent(false)
            .bind(retention_hours as i32)
            .execute(&self.db.pool)
            .await?;
            purged += res.rows_affected();
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_and_attempts() {
        assert_eq!(Priority::ALL[0], Priority::High);
        assert_eq!(Priority::ALL[2], Priority::Low);
        assert_eq!(Priority::High.max_attempts(), 1);
        assert_eq!(Priority::Default.max_attempts(), 3);
        assert_eq!(Priority::Low.max_attempts(), 5);
    }

    #[test]
    fn job_envelope_round_trips() {
        let job = SyncJob::new(Uuid::new_v4(), true, OperationType::ManualSync);
        let payload = JobPayload::Sync(job.clone());
        let encoded = serde_json::to_string(&payload).unwrap();
        assert!(encoded.contains("\"kind\":\"sync\""));
        assert!(encoded.contains("\"manual_sync\""));
        let decoded: JobPayload = serde_json::from_str(&encoded).unwrap();
        match decoded {
            JobPayload::Sync(d) => {
                assert_eq!(d.job_id, job.job_id);
                assert_eq!(d.library_id, job.library_id);
                assert!(d.force);
            }
            _ => panic!("wrong variant"),
        }
    }
}
