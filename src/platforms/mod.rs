//! Uniform per-platform fetch contract. One adapter per external platform;
//! the sync worker only ever talks to this trait.

pub mod steam;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classified adapter failure. The worker's state machine branches on the
/// kind, never on platform-specific detail.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transient platform error: {0}")]
    Transient(String),
    #[error("platform rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("platform auth failed: {0}")]
    Auth(String),
    #[error("platform user not found: {0}")]
    NotFound(String),
    #[error("permanent platform error: {0}")]
    Permanent(String),
}

/// External catalog identifiers carried by a normalized game. At most one is
/// set per source platform; merge jobs may accrete more over time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalIds {
    pub steam_appid: Option<i64>,
    pub gog_id: Option<String>,
    pub epic_id: Option<String>,
    pub xbox_id: Option<String>,
    pub igdb_id: Option<i64>,
}

impl ExternalIds {
    pub fn is_empty(&self) -> bool {
        self.steam_appid.is_none()
            && self.gog_id.is_none()
            && self.epic_id.is_none()
            && self.xbox_id.is_none()
            && self.igdb_id.is_none()
    }
}

/// Platform response mapped to the universal shape the catalog understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedGame {
    pub platform_game_id: String,
    pub title: String,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub metacritic_score: Option<i32>,
    pub metacritic_url: Option<String>,
    pub steam_score: Option<i32>,
    pub steam_review_count: Option<i32>,
    pub cover_image_url: Option<String>,
    pub background_image_url: Option<String>,
    pub screenshots: Vec<String>,
    pub videos: Vec<String>,
    pub website_url: Option<String>,
    pub external_ids: ExternalIds,
    pub playtime_minutes: i64,
    pub last_played_at: Option<DateTime<Utc>>,
    pub platform_data: Value,
}

impl NormalizedGame {
    pub fn new(platform_game_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            platform_game_id: platform_game_id.into(),
            title: title.into(),
            developer: None,
            publisher: None,
            description: None,
            short_description: None,
            release_date: None,
            genres: Vec::new(),
            tags: Vec::new(),
            metacritic_score: None,
            metacritic_url: None,
            steam_score: None,
            steam_review_count: None,
            cover_image_url: None,
            background_image_url: None,
            screenshots: Vec::new(),
            videos: Vec::new(),
            website_url: None,
            external_ids: ExternalIds::default(),
            playtime_minutes: 0,
            last_played_at: None,
            platform_data: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_identifier: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub profile_url: Option<String>,
    pub total_games: u64,
    pub total_playtime_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct AchievementDef {
    pub platform_achievement_id: String,
    pub title: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone)]
pub struct AchievementUnlock {
    pub platform_achievement_id: String,
    pub unlocked_at: DateTime<Utc>,
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Lowercase platform code this adapter serves (e.g. "steam").
    fn platform_code(&self) -> &'static str;

    /// Canonicalize a user-supplied identifier (vanity names, short ids) to
    /// the platform's stable form. Identity for already-canonical input.
    async fn resolve_user(&self, user_identifier: &str) -> Result<String, AdapterError>;

    async fn user_profile(&self, user_identifier: &str) -> Result<UserProfile, AdapterError>;

    /// Remote library size for progress accounting. Counts one rate-limit
    /// charge; adapters may satisfy it from a primed cache.
    async fn count_games(&self, user_identifier: &str) -> Result<u64, AdapterError>;

    /// Page of the user's library, restartable at any offset. Pages must be
    /// stable for the lifetime of the adapter's cache window so resumed syncs
    /// see consistent slices.
    async fn fetch_batch(
        &self,
        user_identifier: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<NormalizedGame>, AdapterError>;

    /// Lazy per-game enrichment (store metadata, scores, media). Used by the
    /// low-priority enrichment path, not the main sync loop.
    async fn game_details(
        &self,
        platform_game_id: &str,
    ) -> Result<Option<NormalizedGame>, AdapterError>;

    async fn game_achievements(
        &self,
        platform_game_id: &str,
    ) -> Result<Vec<AchievementDef>, AdapterError>;

    async fn user_achievements(
        &self,
        user_identifier: &str,
        platform_game_id: &str,
    ) -> Result<Vec<AchievementUnlock>, AdapterError>;
}

impl AdapterError {
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Transient(_) => "PLATFORM_TRANSIENT",
            AdapterError::RateLimited { .. } => "PLATFORM_RATE_LIMITED",
            AdapterError::Auth(_) => "PLATFORM_AUTH_FAILED",
            AdapterError::NotFound(_) => "PLATFORM_USER_NOT_FOUND",
            AdapterError::Permanent(_) => "PLATFORM_ERROR",
        }
    }
}
