//! Full-text catalog search with weighted ranking and user-library filters.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Row};
use uuid::Uuid;

use super::db::Db;
use super::models::{Game, GameStatus};
use crate::error::AppResult;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub platforms: Vec<String>,
    pub statuses: Vec<GameStatus>,
    pub genres: Vec<String>,
    pub min_metacritic: Option<i32>,
    pub max_metacritic: Option<i32>,
    pub owned_only: bool,
    pub library_id: Option<Uuid>,
    pub page: i64,
    pub limit: i64,
}

impl SearchParams {
    fn needs_user_scope(&self) -> bool {
        self.library_id.is_some() || self.owned_only || !self.statuses.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub items: Vec<Game>,
    pub total: i64,
    pub page: i64,
    pub pages: i64,
}

/// Weighted text match (title A > developer/publisher B > description C),
/// tie-broken by release date desc then title asc. Library-scoped filters
/// are expressed as an EXISTS over user_games so a game owned in several
/// libraries still appears once.
pub async fn search_games(db: &Db, params: &SearchParams) -> AppResult<SearchResults> {
    let limit = params.limit.clamp(1, 100);
    let page = params.page.max(1);
    let offset = (page - 1) * limit;
    let query_text = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());

    let mut qb = QueryBuilder::new("SELECT g.*, count(*) OVER () AS total_rows");
    if let Some(q) = query_text {
        qb.push(", ts_rank(g.search_vector, websearch_to_tsquery('english', ");
        qb.push_bind(q);
        qb.push(")) AS rank");
    }
    qb.push(" FROM games g WHERE true");

    if let Some(q) = query_text {
        qb.push(" AND g.search_vector @@ websearch_to_tsquery('english', ");
        qb.push_bind(q);
        qb.push(")");
    }
    if !params.platforms.is_empty() {
        // platforms_available is a JSONB array of platform codes.
        qb.push(" AND g.platforms_available ?| ");
        qb.push_bind(params.platforms.clone());
    }
    if !params.genres.is_empty() {
        qb.push(" AND g.genres ?| ");
        qb.push_bind(params.genres.clone());
    }
    if let Some(min) = params.min_metacritic {
        qb.push(" AND g.metacritic_score >= ");
        qb.push_bind(min);
    }
    if let Some(max) = params.max_metacritic {
        qb.push(" AND g.metacritic_score <= ");
        qb.push_bind(max);
    }
    if params.needs_user_scope() {
        qb.push(" AND EXISTS (SELECT 1 FROM user_games ug WHERE ug.game_id = g.game_id");
        if let Some(lib) = params.library_id {
            qb.push(" AND ug.library_id = ");
            qb.push_bind(lib);
        }
        if params.owned_only {
            qb.push(" AND ug.owned");
        }
        if !params.statuses.is_empty() {
            qb.push(" AND ug.game_status = ANY(");
            qb.push_bind(params.statuses.clone());
            qb.push(")");
        }
        qb.push(")");
    }

    if query_text.is_some() {
        qb.push(" ORDER BY rank DESC, g.release_date DESC NULLS LAST, g.title ASC");
    } else {
        qb.push(" ORDER BY g.release_date DESC NULLS LAST, g.title ASC");
    }
    qb.push(" LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows = qb.build().persistent(false).fetch_all(&db.pool).await?;
    let total = rows
        .first()
        .map(|r| r.get::<i64, _>("total_rows"))
        .unwrap_or(0);
    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(Game::from_row(row)?);
    }

    Ok(SearchResults {
        items,
        total,
        page,
        pages: if total == 0 { 0 } else { (total + limit - 1) / limit },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_math_rounds_up() {
        let results = SearchResults {
            items: vec![],
            total: 101,
            page: 1,
            pages: (101 + 50 - 1) / 50,
        };
        assert_eq!(results.pages, 3);
    }

    #[test]
    fn user_scope_detection() {
        let mut params = SearchParams::default();
        assert!(!params.needs_user_scope());
        params.owned_only = true;
        assert!(params.needs_user_scope());
        params.owned_only = false;
        params.library_id = Some(Uuid::new_v4());
        assert!(params.needs_user_scope());
    }
}
