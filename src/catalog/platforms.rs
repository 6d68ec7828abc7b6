use anyhow::Result;
use uuid::Uuid;

use super::db::Db;
use super::models::Platform;

/// Idempotent platform upsert keyed by `platform_code`.
pub async fn upsert_platform(
    db: &Db,
    code: &str,
    name: &str,
    api_available: bool,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO platforms (platform_code, platform_name, api_available)
         VALUES ($1, $2, $3)
         ON CONFLICT (platform_code) DO UPDATE
             SET platform_name = EXCLUDED.platform_name,
                 api_available = EXCLUDED.api_available,
                 updated_at = now()
         RETURNING platform_id",
    )
    .persistent(false)
    .bind(code)
    .bind(name)
    .bind(api_available)
    .fetch_one(&db.pool)
    .await?;
    Ok(id)
}

pub async fn list_platforms(db: &Db, enabled_only: bool) -> Result<Vec<Platform>> {
    let rows = if enabled_only {
        sqlx::query_as::<_, Platform>(
            "SELECT * FROM platforms WHERE api_available ORDER BY platform_code",
        )
        .persistent(false)
        .fetch_all(&db.pool)
        .await?
    } else {
        sqlx::query_as::<_, Platform>("SELECT * FROM platforms ORDER BY platform_code")
            .persistent(false)
            .fetch_all(&db.pool)
            .await?
    };
    Ok(rows)
}

pub async fn get_platform(db: &Db, platform_id: Uuid) -> Result<Option<Platform>> {
    let row = sqlx::query_as::<_, Platform>("SELECT * FROM platforms WHERE platform_id = $1")
        .persistent(false)
        .bind(platform_id)
        .fetch_optional(&db.pool)
        .await?;
    Ok(row)
}

pub async fn get_platform_by_code(db: &Db, code: &str) -> Result<Option<Platform>> {
    let row = sqlx::query_as::<_, Platform>("SELECT * FROM platforms WHERE platform_code = $1")
        .persistent(false)
        .bind(code)
        .fetch_optional(&db.pool)
        .await?;
    Ok(row)
}

/// Seed the immutable platform catalog. Only steam carries a live adapter;
/// the rest are listed so libraries can be registered ahead of adapter work.
pub async fn seed_platforms(db: &Db) -> Result<()> {
    for (code, name, api) in [
        ("steam", "Steam", true),
        ("gog", "GOG", false),
        ("epic", "Epic Games Store", false),
        ("xbox", "Xbox", false),
        ("playstation", "PlayStation", false),
        ("manual", "Manual Entry", false),
    ] {
        upsert_platform(db, code, name, api).await?;
    }
    Ok(())
}
