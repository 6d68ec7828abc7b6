use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::db::Db;
use super::models::{SyncStatus, UserLibrary};
use crate::error::{AppError, AppResult};

const UNIQUE_VIOLATION: &str = "23505";

pub struct NewLibrary {
    pub platform_id: Uuid,
    pub user_identifier: String,
    pub display_name: String,
    pub credentials: Option<Value>,
}

#[derive(Default)]
pub struct LibraryPatch {
    pub display_name: Option<String>,
    pub credentials: Option<Value>,
    pub sync_enabled: Option<bool>,
}

pub async fn create_library(db: &Db, new: NewLibrary) -> AppResult<UserLibrary> {
    let res = sqlx::query_as::<_, UserLibrary>(
        "INSERT INTO user_libraries (platform_id, user_identifier, display_name, api_credentials)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .persistent(false)
    .bind(new.platform_id)
    .bind(&new.user_identifier)
    .bind(&new.display_name)
    .bind(&new.credentials)
    .fetch_one(&db.pool)
    .await;

    match res {
        Ok(lib) => Ok(lib),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Err(AppError::conflict(
                "LIBRARY_ALREADY_EXISTS",
                format!(
                    "a library for this platform and user {} already exists",
                    new.user_identifier
                ),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_library(db: &Db, library_id: Uuid) -> AppResult<UserLibrary> {
    sqlx::query_as::<_, UserLibrary>("SELECT * FROM user_libraries WHERE library_id = $1")
        .persistent(false)
        .bind(library_id)
        .fetch_optional(&db.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("library {library_id}")))
}

pub async fn list_libraries(
    db: &Db,
    page: i64,
    limit: i64,
) -> AppResult<(Vec<UserLibrary>, i64)> {
    let limit = limit.clamp(1, 200);
    let offset = (page.max(1) - 1) * limit;
    let total: i64 = sqlx::query_scalar("SELECT count(*) FROM user_libraries")
        .persistent(false)
        .fetch_one(&db.pool)
        .await?;
    let rows = sqlx::query_as::<_, UserLibrary>(
        "SELECT * FROM user_libraries ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .persistent(false)
    .bind(limit)
    .bind(offset)
    .fetch_all(&db.pool)
    .await?;
    Ok((rows, total))
}

pub async fn update_library(
    db: &Db,
    library_id: Uuid,
    patch: LibraryPatch,
) -> AppResult<UserLibrary> {
    let row = sqlx::query_as::<_, UserLibrary>(
        "UPDATE user_libraries
            SET display_name = COALESCE($2, display_name),
                api_credentials = COALESCE($3, api_credentials),
                sync_enabled = COALESCE($4, sync_enabled),
                updated_at = now()
          WHERE library_id = $1
          RETURNING *",
    )
    .persistent(false)
    .bind(library_id)
    .bind(&patch.display_name)
    .bind(&patch.credentials)
    .bind(patch.sync_enabled)
    .fetch_optional(&db.pool)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("library {library_id}")))
}

/// Cascades to user_games and their achievements via FK constraints. Catalog
/// games are shared entities and survive.
pub async fn delete_library(db: &Db, library_id: Uuid) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM user_libraries WHERE library_id = $1")
        .persistent(false)
        .bind(library_id)
        .execute(&db.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::not_found(format!("library {library_id}")));
    }
    Ok(())
}

/// Mirror of the sync engine's status into the library row; the worker calls
/// this through the sync-state layer on every transition.
pub async fn set_sync_status(
    db: &Db,
    library_id: Uuid,
    status: SyncStatus,
    error: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE user_libraries
            SET sync_status = $2,
                sync_error = $3,
                last_sync_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled', 'rate_limited')
                                    THEN $4 ELSE last_sync_at END,
                updated_at = now()
          WHERE library_id = $1",
    )
    .persistent(false)
    .bind(library_id)
    .bind(status)
    .bind(error)
    .bind(Utc::now())
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Opaque per-platform resume document, owned by the adapter family.
pub async fn set_sync_position(db: &Db, library_id: Uuid, position: Option<Value>) -> AppResult<()> {
    sqlx::query(
        "UPDATE user_libraries SET sync_position = $2, updated_at = now() WHERE library_id = $1",
    )
    .persistent(false)
    .bind(library_id)
    .bind(&position)
    .execute(&db.pool)
    .await?;
    Ok(())
}
