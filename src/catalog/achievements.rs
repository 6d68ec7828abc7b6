use anyhow::Result;
use uuid::Uuid;

use super::db::Db;
use crate::platforms::{AchievementDef, AchievementUnlock};

/// Upsert the achievement schema for a game on one platform. Returns the
/// number of definitions written.
pub async fn upsert_game_achievements(
    db: &Db,
    game_id: Uuid,
    platform_id: Uuid,
    defs: &[AchievementDef],
) -> Result<u64> {
    let mut written = 0u64;
    for def in defs {
        sqlx::query(
            "INSERT INTO game_achievements
                 (game_id, platform_id, platform_achievement_id, title, description, icon_url, hidden)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (game_id, platform_id, platform_achievement_id) DO UPDATE SET
                 title = EXCLUDED.title,
                 description = COALESCE(EXCLUDED.description, game_achievements.description),
                 icon_url = COALESCE(EXCLUDED.icon_url, game_achievements.icon_url),
                 hidden = EXCLUDED.hidden",
        )
        .persistent(false)
        .bind(game_id)
        .bind(platform_id)
        .bind(&def.platform_achievement_id)
        .bind(&def.title)
        .bind(&def.description)
        .bind(&def.icon_url)
        .bind(def.hidden)
        .execute(&db.pool)
        .await?;
        written += 1;
    }
    Ok(written)
}

/// Record unlocks for a user game, resolving the platform achievement id to
/// our achievement row. Unknown achievement ids are skipped (the schema may
/// lag behind the platform).
pub async fn upsert_user_achievements(
    db: &Db,
    user_game_id: Uuid,
    game_id: Uuid,
    platform_id: Uuid,
    unlocks: &[AchievementUnlock],
) -> Result<u64> {
    let mut written = 0u64;
    for unlock in unlocks {
        let res = sqlx::query(
            "INSERT INTO user_achievements (user_game_id, achievement_id, unlocked_at, progress_percent)
             SELECT $1, ga.achievement_id, $2, 100
               FROM game_achievements ga
              WHERE ga.game_id = $3 AND ga.platform_id = $4 AND ga.platform_achievement_id = $5
             ON CONFLICT (user_game_id, achievement_id) DO NOTHING",
        )
        .persistent(false)
        .bind(user_game_id)
        .bind(unlock.unlocked_at)
        .bind(game_id)
        .bind(platform_id)
        .bind(&unlock.platform_achievement_id)
        .execute(&db.pool)
        .await?;
        written += res.rows_affected();
    }
    Ok(written)
}
