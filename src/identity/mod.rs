//! Cross-platform game identity resolution: decide which catalog game an
//! incoming platform listing is, creating a new row only as a last resort.

pub mod normalize;

use anyhow::Result;
use sqlx::Row;
use strsim::normalized_levenshtein;
use uuid::Uuid;

use crate::catalog::db::Db;
use crate::catalog::models::MatchMethod;
use crate::platforms::NormalizedGame;
use normalize::{normalize_title, slugify};

/// Minimum normalized Levenshtein ratio for a fuzzy title match. Below this,
/// a new catalog row is created instead.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.92;

const EXACT_MATCH_CONFIDENCE: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// Matched an existing catalog game.
    Existing {
        method: MatchMethod,
        confidence: f32,
    },
    /// No strategy hit; a fresh catalog row was inserted.
    Created,
}

#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub game_id: Uuid,
    pub outcome: MatchOutcome,
}

/// Ordered matching strategy: external id (1.00) > exact normalized title
/// (0.95) > fuzzy title with publisher/developer corroboration (ratio) > new
/// row. Title-based hits record a `game_matches` review edge.
pub async fn resolve_game(db: &Db, incoming: &NormalizedGame) -> Result<Resolution> {
    let normalized = normalize_title(&incoming.title);

    if let Some(game_id) = match_by_external_id(db, incoming).await? {
        return Ok(Resolution {
            game_id,
            outcome: MatchOutcome::Existing {
                method: MatchMethod::ExternalId,
                confidence: 1.0,
            },
        });
    }

    if let Some(game_id) = match_by_exact_title(db, &normalized).await? {
        record_match_edge(db, game_id, game_id, EXACT_MATCH_CONFIDENCE, MatchMethod::TitleExact)
            .await?;
        return Ok(Resolution {
            game_id,
            outcome: MatchOutcome::Existing {
                method: MatchMethod::TitleExact,
                confidence: EXACT_MATCH_CONFIDENCE,
            },
        });
    }

    if let Some((game_id, ratio)) = match_by_fuzzy_title(db, incoming, &normalized).await? {
        record_match_edge(db, game_id, game_id, ratio as f32, MatchMethod::TitleFuzzy).await?;
        return Ok(Resolution {
            game_id,
            outcome: MatchOutcome::Existing {
                method: MatchMethod::TitleFuzzy,
                confidence: ratio as f32,
            },
        });
    }

    let game_id = insert_new_game(db, incoming, &normalized).await?;
    Ok(Resolution {
        game_id,
        outcome: MatchOutcome::Created,
    })
}

async fn match_by_external_id(db: &Db, incoming: &NormalizedGame) -> Result<Option<Uuid>> {
    let ids = &incoming.external_ids;
    if ids.is_empty() {
        return Ok(None);
    }
    let row = sqlx::query(
        "SELECT game_id FROM games
          WHERE ($1::bigint IS NOT NULL AND steam_appid = $1)
             OR ($2::text IS NOT NULL AND gog_id = $2)
             OR ($3::text IS NOT NULL AND epic_id = $3)
             OR ($4::text IS NOT NULL AND xbox_id = $4)
             OR ($5::bigint IS NOT NULL AND igdb_id = $5)
          LIMIT 1",
    )
    .persistent(false)
    .bind(ids.steam_appid)
    .bind(&ids.gog_id)
    .bind(&ids.epic_id)
    .bind(&ids.xbox_id)
    .bind(ids.igdb_id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row.map(|r| r.get("game_id")))
}

async fn match_by_exact_title(db: &Db, normalized: &str) -> Result<Option<Uuid>> {
    if normalized.is_empty() {
        return Ok(None);
    }
    let row = sqlx::query("SELECT game_id FROM games WHERE normalized_title = $1 LIMIT 1")
        .persistent(false)
        .bind(normalized)
        .fetch_optional(&db.pool)
        .await?;
    Ok(row.map(|r| r.get("game_id")))
}

/// Fuzzy pass over a narrowed candidate set (shared title prefix). The ratio
/// alone is not enough: both sides must agree on publisher or developer when
/// both carry one.
async fn match_by_fuzzy_title(
    db: &Db,
    incoming: &NormalizedGame,
    normalized: &str,
) -> Result<Option<(Uuid, f64)>> {
    let Some(prefix) = normalized.get(0..1) else {
        return Ok(None);
    };
    let rows = sqlx::query(
        "SELECT game_id, normalized_title, developer, publisher
           FROM games
          WHERE left(normalized_title, 1) = $1
          LIMIT 500",
    )
    .persistent(false)
    .bind(prefix)
    .fetch_all(&db.pool)
    .await?;

    let mut best: Option<(Uuid, f64)> = None;
    for row in rows {
        let candidate_title: String = row.get("normalized_title");
        let ratio = normalized_levenshtein(normalized, &candidate_title);
        if ratio < FUZZY_MATCH_THRESHOLD {
            continue;
        }
        let developer: Option<String> = row.get("developer");
        let publisher: Option<String> = row.get("publisher");
        if !companies_corroborate(
            incoming.publisher.as_deref(),
            incoming.developer.as_deref(),
            publisher.as_deref(),
            developer.as_deref(),
        ) {
            continue;
        }
        if best.map(|(_, b)| ratio > b).unwrap_or(true) {
            best = Some((row.get("game_id"), ratio));
        }
    }
    Ok(best)
}

/// Publisher OR developer must match when both sides have the field; a side
/// with neither field present cannot corroborate and the fuzzy hit is
/// rejected (ratio alone is too weak for a merge).
fn companies_corroborate(
    in_publisher: Option<&str>,
    in_developer: Option<&str>,
    cand_publisher: Option<&str>,
    cand_developer: Option<&str>,
) -> bool {
    let pub_match = match (in_publisher, cand_publisher) {
        (Some(a), Some(b)) => Some(a.eq_ignore_ascii_case(b)),
        _ => None,
    };
    let dev_match = match (in_developer, cand_developer) {
        (Some(a), Some(b)) => Some(a.eq_ignore_ascii_case(b)),
        _ => None,
    };
    match (pub_match, dev_match) {
        (Some(true), _) | (_, Some(true)) => true,
        (None, None) => false,
        _ => false,
    }
}

/// Review edge for automatic title matches. Reflexive edges mark the fold of
/// a platform listing into an existing catalog game; merge jobs insert proper
/// cross-game edges with the `primary < matched` orientation.
pub async fn record_match_edge(
    db: &Db,
    a: Uuid,
    b: Uuid,
    confidence: f32,
    method: MatchMethod,
) -> Result<()> {
    let (primary, matched) = if a <= b { (a, b) } else { (b, a) };
    sqlx::query(
        "INSERT INTO game_matches (primary_game_id, matched_game_id, confidence, method, verified)
         VALUES ($1, $2, $3, $4, false)
         ON CONFLICT (primary_game_id, matched_game_id) DO NOTHING",
    )
    .persistent(false)
    .bind(primary)
    .bind(matched)
    .bind(confidence)
    .bind(method)
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// A verified manual match overrides whatever the automatic strategies wrote.
pub async fn record_manual_match(db: &Db, a: Uuid, b: Uuid) -> Result<()> {
    let (primary, matched) = if a <= b { (a, b) } else { (b, a) };
    sqlx::query(
        "INSERT INTO game_matches (primary_game_id, matched_game_id, confidence, method, verified)
         VALUES ($1, $2, 1.0, 'manual', true)
         ON CONFLICT (primary_game_id, matched_game_id) DO UPDATE
             SET confidence = 1.0, method = 'manual', verified = true",
    )
    .persistent(false)
    .bind(primary)
    .bind(matched)
    .execute(&db.pool)
    .await?;
    Ok(())
}

async fn insert_new_game(db: &Db, incoming: &NormalizedGame, normalized: &str) -> Result<Uuid> {
    let slug = slugify(&incoming.title);
    let genres = serde_json::to_value(&incoming.genres)?;
    let tags = serde_json::to_value(&incoming.tags)?;
    let screenshots = serde_json::to_value(&incoming.screenshots)?;
    let videos = serde_json::to_value(&incoming.videos)?;
    let game_id: Uuid = sqlx::query_scalar(
        "INSERT INTO games (
             title, normalized_title, slug, description, short_description,
             release_date, developer, publisher, genres, tags,
             metacritic_score, metacritic_url, steam_score, steam_review_count,
             cover_image_url, background_image_url, screenshots, videos, website_url,
             steam_appid, gog_id, epic_id, xbox_id, igdb_id,
             search_vector
         ) VALUES (
             $1, $2, NULLIF($3, ''), $4, $5,
             $6, $7, $8, $9, $10,
             $11, $12, $13, $14,
             $15, $16, $17, $18, $19,
             $20, $21, $22, $23, $24,
             setweight(to_tsvector('english', coalesce($1, '')), 'A') ||
             setweight(to_tsvector('english', coalesce($7, '') || ' ' || coalesce($8, '')), 'B') ||
             setweight(to_tsvector('english', coalesce($4, '')), 'C')
         )
         ON CONFLICT (slug) DO UPDATE SET updated_at = now()
         RETURNING game_id",
    )
    .persistent(false)
    .bind(&incoming.title)
    .bind(normalized)
    .bind(&slug)
    .bind(&incoming.description)
    .bind(&incoming.short_description)
    .bind(incoming.release_date)
    .bind(&incoming.developer)
    .bind(&incoming.publisher)
    .bind(&genres)
    .bind(&tags)
    .bind(incoming.metacritic_score)
    .bind(&incoming.metacritic_url)
    .bind(incoming.steam_score)
    .bind(incoming.steam_review_count)
    .bind(&incoming.cover_image_url)
    .bind(&incoming.background_image_url)
    .bind(&screenshots)
    .bind(&videos)
    .bind(&incoming.website_url)
    .bind(incoming.external_ids.steam_appid)
    .bind(&incoming.external_ids.gog_id)
    .bind(&incoming.external_ids.epic_id)
    .bind(&incoming.external_ids.xbox_id)
    .bind(incoming.external_ids.igdb_id)
    .fetch_one(&db.pool)
    .await?;
    Ok(game_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corroboration_requires_overlap_on_present_fields() {
        // Publisher agrees.
        assert!(companies_corroborate(
            Some("CD PROJEKT RED"),
            None,
            Some("cd projekt red"),
            Some("CDPR")
        ));
        // Developer agrees, publisher disagrees.
        assert!(companies_corroborate(
            Some("A"),
            Some("Dev"),
            Some("B"),
            Some("dev")
        ));
        // Both present, both disagree.
        assert!(!companies_corroborate(
            Some("A"),
            Some("X"),
            Some("B"),
            Some("Y")
        ));
        // Neither side comparable.
        assert!(!companies_corroborate(None, None, Some("B"), None));
    }

    #[test]
    fn fuzzy_threshold_is_tight() {
        let a = "the witcher 3 wild hunt";
        let b = "the witcher 3 wild hunt"; // identical after normalization
        assert!(normalized_levenshtein(a, b) >= FUZZY_MATCH_THRESHOLD);
        let c = "the witcher 2 assassins of kings";
        assert!(normalized_levenshtein(a, c) < FUZZY_MATCH_THRESHOLD);
    }
}
