use anyhow::Result;
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use super::db::Db;
use super::models::{Game, UserGame};
use crate::error::{AppError, AppResult};
use crate::identity::{self, MatchOutcome};
use crate::platforms::NormalizedGame;

/// Outcome counters for one upsert batch. `added + updated <= processed`
/// always; the remainder saw no change.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct UpsertCounts {
    pub added: u32,
    pub updated: u32,
    pub unchanged: u32,
}

impl UpsertCounts {
    pub fn processed(&self) -> u32 {
        self.added + self.updated + self.unchanged
    }

    pub fn absorb(&mut self, other: UpsertCounts) {
        self.added += other.added;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// A platform reported less playtime than we had stored. The lower value is
/// recorded; the regression is surfaced into the operation log for review.
#[derive(Debug, Clone, Serialize)]
pub struct PlaytimeRegression {
    pub game_id: Uuid,
    pub title: String,
    pub previous_minutes: i32,
    pub reported_minutes: i32,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub counts: UpsertCounts,
    pub regressions: Vec<PlaytimeRegression>,
}

/// Idempotent batch upsert: resolve each incoming game to a catalog identity,
/// enrich the catalog row, and upsert the per-library ownership fact. The
/// caller (sync worker) holds the library lock, so rows for one library are
/// never written concurrently.
pub async fn upsert_games_batch(
    db: &Db,
    library_id: Uuid,
    games: &[NormalizedGame],
) -> AppResult<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    for game in games {
        validate_incoming(game)?;
        let resolution = identity::resolve_game(db, game).await?;
        if let MatchOutcome::Existing { .. } = resolution.outcome {
            enrich_game(db, resolution.game_id, game).await?;
        }
        let row = upsert_user_game(db, library_id, resolution.game_id, game).await?;
        match row {
            UserGameWrite::Inserted => outcome.counts.added += 1,
            UserGameWrite::Updated { prev_playtime } => {
                outcome.counts.updated += 1;
                if (prev_playtime as i64) > game.playtime_minutes {
                    outcome.regressions.push(PlaytimeRegression {
                        game_id: resolution.game_id,
                        title: game.title.clone(),
                        previous_minutes: prev_playtime,
                        reported_minutes: game.playtime_minutes as i32,
                    });
                }
            }
            UserGameWrite::Unchanged => outcome.counts.unchanged += 1,
        }
    }
    Ok(outcome)
}

fn validate_incoming(game: &NormalizedGame) -> AppResult<()> {
    let mut bad_fields = Vec::new();
    if game.title.trim().is_empty() {
        bad_fields.push("title".to_string());
    }
    if let Some(score) = game.metacritic_score {
        if !(0..=100).contains(&score) {
            bad_fields.push("metacritic_score".to_string());
        }
    }
    if let Some(score) = game.steam_score {
        if !(0..=100).contains(&score) {
            bad_fields.push("steam_score".to_string());
        }
    }
    if game.playtime_minutes < 0 {
        bad_fields.push("playtime_minutes".to_string());
    }
    if bad_fields.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(
            format!("invalid game payload for '{}'", game.title),
            bad_fields,
        ))
    }
}

enum UserGameWrite {
    Inserted,
    Updated { prev_playtime: i32 },
    Unchanged,
}

async fn upsert_user_game(
    db: &Db,
    library_id: Uuid,
    game_id: Uuid,
    game: &NormalizedGame,
) -> Result<UserGameWrite> {
    let playtime = game.playtime_minutes.clamp(0, i32::MAX as i64) as i32;
    // The prev CTE snapshots the pre-upsert row; the conditional DO UPDATE
    // skips the write entirely when nothing material changed, which keeps
    // reruns on an unchanged remote library byte-identical.
    let row = sqlx::query(
        "WITH prev AS (
             SELECT total_playtime_minutes
               FROM user_games
              WHERE library_id = $1 AND game_id = $2
         )
         INSERT INTO user_games (
             library_id, game_id, platform_game_id, owned,
             total_playtime_minutes, last_played_at, first_played_at,
             platform_data, last_synced_at
         ) VALUES ($1, $2, $3, true, $4, $5, $5, $6, now())
         ON CONFLICT (library_id, game_id) DO UPDATE SET
             platform_game_id = EXCLUDED.platform_game_id,
             total_playtime_minutes = EXCLUDED.total_playtime_minutes,
             last_played_at = COALESCE(EXCLUDED.last_played_at, user_games.last_played_at),
             first_played_at = COALESCE(user_games.first_played_at, EXCLUDED.first_played_at),
             platform_data = EXCLUDED.platform_data,
             last_synced_at = now(),
             updated_at = now()
         WHERE user_games.total_playtime_minutes IS DISTINCT FROM EXCLUDED.total_playtime_minutes
            OR user_games.last_played_at IS DISTINCT FROM
               COALESCE(EXCLUDED.last_played_at, user_games.last_played_at)
            OR user_games.platform_data IS DISTINCT FROM EXCLUDED.platform_data
            OR user_games.platform_game_id IS DISTINCT FROM EXCLUDED.platform_game_id
         RETURNING (xmax = 0) AS inserted,
                   (SELECT total_playtime_minutes FROM prev) AS prev_playtime",
    )
    .persistent(false)
    .bind(library_id)
    .bind(game_id)
    .bind(&game.platform_game_id)
    .bind(playtime)
    .bind(game.last_played_at)
    .bind(&game.platform_data)
    .fetch_optional(&db.pool)
    .await?;

    match row {
        None => Ok(UserGameWrite::Unchanged),
        Some(r) => {
            let inserted: bool = r.get("inserted");
            if inserted {
                Ok(UserGameWrite::Inserted)
            } else {
                Ok(UserGameWrite::Updated {
                    prev_playtime: r.get::<Option<i32>, _>("prev_playtime").unwrap_or(0),
                })
            }
        }
    }
}

/// Fill-if-null enrichment of a matched catalog row, preferring the longer
/// description, then a vector rebuild so the stored `search_vector` stays a
/// pure function of title/developer/publisher/description.
pub async fn enrich_game(db: &Db, game_id: Uuid, game: &NormalizedGame) -> Result<()> {
    sqlx::query(
        "UPDATE games SET
             description = CASE WHEN $2::text IS NOT NULL
                                 AND (description IS NULL OR length(description) < length($2))
                                THEN $2 ELSE description END,
             short_description = COALESCE(short_description, $3),
             developer = COALESCE(developer, $4),
             publisher = COALESCE(publisher, $5),
             release_date = COALESCE(release_date, $6),
             metacritic_score = COALESCE(metacritic_score, $7),
             metacritic_url = COALESCE(metacritic_url, $8),
             steam_score = COALESCE(steam_score, $9),
             steam_review_count = COALESCE(steam_review_count, $10),
             cover_image_url = COALESCE(cover_image_url, $11),
             background_image_url = COALESCE(background_image_url, $12),
             website_url = COALESCE(website_url, $13),
             steam_appid = COALESCE(steam_appid, $14),
             gog_id = COALESCE(gog_id, $15),
             epic_id = COALESCE(epic_id, $16),
             xbox_id = COALESCE(xbox_id, $17),
             igdb_id = COALESCE(igdb_id, $18),
             genres = CASE WHEN genres = '[]'::jsonb THEN $19 ELSE genres END,
             tags = CASE WHEN tags = '[]'::jsonb THEN $20 ELSE tags END,
             screenshots = CASE WHEN screenshots = '[]'::jsonb THEN $21 ELSE screenshots END,
             videos = CASE WHEN videos = '[]'::jsonb THEN $22 ELSE videos END,
             updated_at = now()
         WHERE game_id = $1",
    )
    .persistent(false)
    .bind(game_id)
    .bind(&game.description)
    .bind(&game.short_description)
    .bind(&game.developer)
    .bind(&game.publisher)
    .bind(game.release_date)
    .bind(game.metacritic_score)
    .bind(&game.metacritic_url)
    .bind(game.steam_score)
    .bind(game.steam_review_count)
    .bind(&game.cover_image_url)
    .bind(&game.background_image_url)
    .bind(&game.website_url)
    .bind(game.external_ids.steam_appid)
    .bind(&game.external_ids.gog_id)
    .bind(&game.external_ids.epic_id)
    .bind(&game.external_ids.xbox_id)
    .bind(game.external_ids.igdb_id)
    .bind(serde_json::to_value(&game.genres)?)
    .bind(serde_json::to_value(&game.tags)?)
    .bind(serde_json::to_value(&game.screenshots)?)
    .bind(serde_json::to_value(&game.videos)?)
    .execute(&db.pool)
    .await?;

    rebuild_search_vector(db, game_id).await
}

pub async fn rebuild_search_vector(db: &Db, game_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE games SET search_vector =
             setweight(to_tsvector('english', coalesce(title, '')), 'A') ||
             setweight(to_tsvector('english', coalesce(developer, '') || ' ' || coalesce(publisher, '')), 'B') ||
             setweight(to_tsvector('english', coalesce(description, '')), 'C')
         WHERE game_id = $1",
    )
    .persistent(false)
    .bind(game_id)
    .execute(&db.pool)
    .await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct GameDetails {
    #[serde(flatten)]
    pub game: Game,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_game: Option<UserGame>,
}

pub async fn get_game(db: &Db, game_id: Uuid, library_id: Option<Uuid>) -> AppResult<GameDetails> {
    let game = sqlx::query_as::<_, Game>("SELECT * FROM games WHERE game_id = $1")
        .persistent(false)
        .bind(game_id)
        .fetch_optional(&db.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("game {game_id}")))?;

    let user_game = match library_id {
        Some(lib) => {
            sqlx::query_as::<_, UserGame>(
                "SELECT * FROM user_games WHERE game_id = $1 AND library_id = $2",
            )
            .persistent(false)
            .bind(game_id)
            .bind(lib)
            .fetch_optional(&db.pool)
            .await?
        }
        None => None,
    };

    Ok(GameDetails { game, user_game })
}

pub async fn list_games(db: &Db, page: i64, limit: i64) -> AppResult<(Vec<Game>, i64)> {
    let limit = limit.clamp(1, 200);
    let offset = (page.max(1) - 1) * limit;
    let total: i64 = sqlx::query_scalar("SELECT count(*) FROM games")
        .persistent(false)
        .fetch_one(&db.pool)
        .await?;
    let rows = sqlx::query_as::<_, Game>(
        "SELECT * FROM games ORDER BY title ASC LIMIT $1 OFFSET $2",
    )
    .persistent(false)
    .bind(limit)
    .bind(offset)
    .fetch_all(&db.pool)
    .await?;
    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::NormalizedGame;

    #[test]
    fn counts_sum_to_processed() {
        let mut counts = UpsertCounts::default();
        counts.absorb(UpsertCounts {
            added: 2,
            updated: 1,
            unchanged: 3,
        });
        assert_eq!(counts.processed(), 6);
        assert!(counts.added + counts.updated <= counts.processed());
    }

    #[test]
    fn score_boundaries_are_inclusive() {
        let mut g = NormalizedGame::new("1", "Edge Case");
        g.metacritic_score = Some(0);
        assert!(validate_incoming(&g).is_ok());
        g.metacritic_score = Some(100);
        assert!(validate_incoming(&g).is_ok());
        g.metacritic_score = Some(101);
        let err = validate_incoming(&g).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn blank_title_is_rejected() {
        let g = NormalizedGame::new("1", "   ");
        assert!(validate_incoming(&g).is_err());
    }
}
