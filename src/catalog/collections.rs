//! Per-library game collections. Smart collections carry a rules document
//! that the UI evaluates; the store only persists it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::db::Db;
use crate::error::{AppError, AppResult};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameCollection {
    pub collection_id: Uuid,
    pub library_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_smart: bool,
    pub rules: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn create_collection(
    db: &Db,
    library_id: Uuid,
    name: &str,
    description: Option<&str>,
    is_smart: bool,
    rules: Option<Value>,
) -> AppResult<GameCollection> {
    let res = sqlx::query_as::<_, GameCollection>(
        "INSERT INTO game_collections (library_id, name, description, is_smart, rules)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .persistent(false)
    .bind(library_id)
    .bind(name)
    .bind(description)
    .bind(is_smart)
    .bind(&rules)
    .fetch_one(&db.pool)
    .await;

    match res {
        Ok(c) => Ok(c),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Err(AppError::conflict(
                "COLLECTION_NAME_CONFLICT",
                format!("collection '{name}' already exists in this library"),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn list_collections(db: &Db, library_id: Uuid) -> AppResult<Vec<GameCollection>> {
    let rows = sqlx::query_as::<_, GameCollection>(
        "SELECT * FROM game_collections WHERE library_id = $1 ORDER BY name",
    )
    .persistent(false)
    .bind(library_id)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

pub async fn delete_collection(db: &Db, collection_id: Uuid) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM game_collections WHERE collection_id = $1")
        .persistent(false)
        .bind(collection_id)
        .execute(&db.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::not_found(format!("collection {collection_id}")));
    }
    Ok(())
}

pub async fn add_game(db: &Db, collection_id: Uuid, game_id: Uuid) -> AppResult<bool> {
    let res = sqlx::query(
        "INSERT INTO collection_games (collection_id, game_id)
         VALUES ($1, $2)
         ON CONFLICT (collection_id, game_id) DO NOTHING",
    )
    .persistent(false)
    .bind(collection_id)
    .bind(game_id)
    .execute(&db.pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn remove_game(db: &Db, collection_id: Uuid, game_id: Uuid) -> AppResult<()> {
    sqlx::query("DELETE FROM collection_games WHERE collection_id = $1 AND game_id = $2")
        .persistent(false)
        .bind(collection_id)
        .bind(game_id)
        .execute(&db.pool)
        .await?;
    Ok(())
}
