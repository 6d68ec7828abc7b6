//! Row types and enum domains shared across the store modules.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sync_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Queued,
    InProgress,
    Completed,
    Failed,
    RateLimited,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "game_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Unplayed,
    Playing,
    Completed,
    Abandoned,
    Wishlist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Started,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    FullSync,
    IncrementalSync,
    ManualSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "esrb_rating")]
pub enum EsrbRating {
    E,
    #[sqlx(rename = "E10+")]
    #[serde(rename = "E10+")]
    E10Plus,
    T,
    M,
    AO,
    RP,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "match_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    TitleExact,
    TitleFuzzy,
    ExternalId,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Platform {
    pub platform_id: Uuid,
    pub platform_code: String,
    pub platform_name: String,
    pub api_available: bool,
    pub icon_url: Option<String>,
    pub base_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserLibrary {
    pub library_id: Uuid,
    pub platform_id: Uuid,
    pub user_identifier: String,
    pub display_name: String,
    #[serde(skip_serializing, default)]
    pub api_credentials: Option<Value>,
    pub sync_enabled: bool,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub sync_position: Option<Value>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Game {
    pub game_id: Uuid,
    pub title: String,
    pub normalized_title: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub genres: Value,
    pub tags: Value,
    pub platforms_available: Value,
    pub esrb_rating: Option<EsrbRating>,
    pub esrb_descriptors: Value,
    pub pegi_rating: Option<i32>,
    pub metacritic_score: Option<i32>,
    pub metacritic_url: Option<String>,
    pub steam_score: Option<i32>,
    pub steam_review_count: Option<i32>,
    pub cover_image_url: Option<String>,
    pub background_image_url: Option<String>,
    pub screenshots: Value,
    pub videos: Value,
    pub website_url: Option<String>,
    pub steam_appid: Option<i64>,
    pub gog_id: Option<String>,
    pub epic_id: Option<String>,
    pub xbox_id: Option<String>,
    pub igdb_id: Option<i64>,
    pub playtime_main_hours: Option<i32>,
    pub playtime_completionist_hours: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserGame {
    pub user_game_id: Uuid,
    pub library_id: Uuid,
    pub game_id: Uuid,
    pub platform_game_id: Option<String>,
    pub owned: bool,
    pub owned_at: Option<DateTime<Utc>>,
    pub total_playtime_minutes: i32,
    pub first_played_at: Option<DateTime<Utc>>,
    pub last_played_at: Option<DateTime<Utc>>,
    pub game_status: GameStatus,
    pub user_rating: Option<i32>,
    pub user_notes: Option<String>,
    pub is_favorite: bool,
    pub platform_data: Value,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameAchievement {
    pub achievement_id: Uuid,
    pub game_id: Uuid,
    pub platform_id: Uuid,
    pub platform_achievement_id: String,
    pub title: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub points: i32,
    pub rarity: Option<f32>,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserAchievement {
    pub user_achievement_id: Uuid,
    pub user_game_id: Uuid,
    pub achievement_id: Uuid,
    pub unlocked_at: DateTime<Utc>,
    pub progress_percent: f32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameMatch {
    pub match_id: Uuid,
    pub primary_game_id: Uuid,
    pub matched_game_id: Uuid,
    pub confidence: f32,
    pub method: MatchMethod,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncOperation {
    pub operation_id: Uuid,
    pub library_id: Uuid,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub games_processed: i32,
    pub games_added: i32,
    pub games_updated: i32,
    pub errors_count: i32,
    pub error_details: Option<String>,
    pub log: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esrb_serializes_with_plus_sign() {
        assert_eq!(
            serde_json::to_string(&EsrbRating::E10Plus).unwrap(),
            "\"E10+\""
        );
        assert_eq!(serde_json::to_string(&EsrbRating::M).unwrap(), "\"M\"");
    }

    #[test]
    fn sync_status_uses_snake_case_wire_form() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::RateLimited).unwrap(),
            "\"rate_limited\""
        );
        let parsed: SyncStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(parsed, SyncStatus::InProgress);
    }
}
