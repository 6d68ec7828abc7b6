//! Sync operation audit log. Counters only ever move forward.

use anyhow::Result;
use serde_json::Value;
use uuid::Uuid;

use super::db::Db;
use super::models::{OperationStatus, OperationType, SyncOperation};

pub async fn record_sync_operation(
    db: &Db,
    library_id: Uuid,
    operation_type: OperationType,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO sync_operations (library_id, operation_type, status)
         VALUES ($1, $2, 'started')
         RETURNING operation_id",
    )
    .persistent(false)
    .bind(library_id)
    .bind(operation_type)
    .fetch_one(&db.pool)
    .await?;
    Ok(id)
}

/// Monotonic counter advance; GREATEST guards against late or replayed
/// updates moving anything backwards.
pub async fn update_sync_operation(
    db: &Db,
    operation_id: Uuid,
    status: OperationStatus,
    games_processed: u32,
    games_added: u32,
    games_updated: u32,
    errors_count: u32,
) -> Result<()> {
    sqlx::query(
        "UPDATE sync_operations SET
             status = $2,
             games_processed = GREATEST(games_processed, $3),
             games_added = GREATEST(games_added, $4),
             games_updated = GREATEST(games_updated, $5),
             errors_count = GREATEST(errors_count, $6),
             completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled')
                                 THEN now() ELSE completed_at END
         WHERE operation_id = $1",
    )
    .persistent(false)
    .bind(operation_id)
    .bind(status)
    .bind(games_processed as i32)
    .bind(games_added as i32)
    .bind(games_updated as i32)
    .bind(errors_count as i32)
    .execute(&db.pool)
    .await?;
    Ok(())
}

pub async fn set_operation_error(db: &Db, operation_id: Uuid, details: &str) -> Result<()> {
    sqlx::query("UPDATE sync_operations SET error_details = $2 WHERE operation_id = $1")
        .persistent(false)
        .bind(operation_id)
        .bind(details)
        .execute(&db.pool)
        .await?;
    Ok(())
}

/// Append a structured entry to the operation's JSONB log.
pub async fn append_operation_log(db: &Db, operation_id: Uuid, entry: Value) -> Result<()> {
    sqlx::query("UPDATE sync_operations SET log = log || $2::jsonb WHERE operation_id = $1")
        .persistent(false)
        .bind(operation_id)
        .bind(Value::Array(vec![entry]))
        .execute(&db.pool)
        .await?;
    Ok(())
}

pub async fn get_sync_operation(db: &Db, operation_id: Uuid) -> Result<Option<SyncOperation>> {
    let row = sqlx::query_as::<_, SyncOperation>(
        "SELECT * FROM sync_operations WHERE operation_id = $1",
    )
    .persistent(false)
    .bind(operation_id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}

/// Most recent operation for a library, running or not.
pub async fn latest_operation(db: &Db, library_id: Uuid) -> Result<Option<SyncOperation>> {
    let row = sqlx::query_as::<_, SyncOperation>(
        "SELECT * FROM sync_operations
          WHERE library_id = $1
          ORDER BY started_at DESC
          LIMIT 1",
    )
    .persistent(false)
    .bind(library_id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}

/// The running operation for a library, if any; used by the HTTP layer to
/// fill the conflict response's details.
pub async fn running_operation(db: &Db, library_id: Uuid) -> Result<Option<SyncOperation>> {
    let row = sqlx::query_as::<_, SyncOperation>(
        "SELECT * FROM sync_operations
          WHERE library_id = $1 AND status IN ('started', 'in_progress')
          ORDER BY started_at DESC
          LIMIT 1",
    )
    .persistent(false)
    .bind(library_id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}
