//! Steam adapter. The whole owned-games library arrives in one Web API call;
//! it is cached per user for a bounded period and sliced locally so the sync
//! worker gets a stable page-level interface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;
use tracing::{debug, info};

use steam_client::{AppDetails, OwnedGame, SteamClient, SteamConfig, SteamError};

use super::{
    AchievementDef, AchievementUnlock, AdapterError, ExternalIds, NormalizedGame, PlatformAdapter,
    UserProfile,
};
use crate::ratelimit::{RateError, RateLimiter};

pub const PLATFORM_CODE: &str = "steam";

struct CachedLibrary {
    fetched_at: Instant,
    games: Arc<Vec<OwnedGame>>,
}

pub struct SteamAdapter {
    client: SteamClient,
    limiter: Arc<RateLimiter>,
    cache_ttl: Duration,
    cache: tokio::sync::Mutex<HashMap<String, CachedLibrary>>,
}

impl SteamAdapter {
    pub fn new(api_key: impl Into<String>, limiter: Arc<RateLimiter>, cache_ttl: Duration) -> Self {
        Self {
            client: SteamClient::new(SteamConfig::new(api_key)),
            limiter,
            cache_ttl,
            cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Owned-games listing for a user, hitting the network at most once per
    /// cache window. Every network trip charges the shared rate budget.
    async fn owned_games_cached(
        &self,
        steamid: &str,
    ) -> Result<Arc<Vec<OwnedGame>>, AdapterError> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(steamid) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                return Ok(entry.games.clone());
            }
        }

        self.charge(1).await?;
        let resp = self
            .client
            .owned_games(steamid)
            .await
            .map_err(map_steam_err)?;
        info!(steamid, game_count = resp.games.len(), "steam library fetched");
        let games = Arc::new(resp.games);
        cache.insert(
            steamid.to_string(),
            CachedLibrary {
                fetched_at: Instant::now(),
                games: games.clone(),
            },
        );
        Ok(games)
    }

    async fn charge(&self, weight: u32) -> Result<(), AdapterError> {
        match self.limiter.acquire(PLATFORM_CODE, weight).await {
            Ok(()) => Ok(()),
            Err(RateError::DailyCapExceeded { .. }) => Err(AdapterError::RateLimited {
                // Past the daily cap there is no point retrying inside the
                // window; push the job out an hour.
                retry_after_secs: 3600,
            }),
            Err(RateError::Storage(e)) => Err(AdapterError::Transient(e.to_string())),
        }
    }
}

#[async_trait]
impl PlatformAdapter for SteamAdapter {
    fn platform_code(&self) -> &'static str {
        PLATFORM_CODE
    }

    async fn resolve_user(&self, user_identifier: &str) -> Result<String, AdapterError> {
        if is_steamid64(user_identifier) {
            return Ok(user_identifier.to_string());
        }
        self.charge(1).await?;
        match self
            .client
            .resolve_vanity_url(user_identifier)
            .await
            .map_err(map_steam_err)?
        {
            Some(steamid) => Ok(steamid),
            None => Err(AdapterError::NotFound(format!(
                "steam vanity url '{user_identifier}'"
            ))),
        }
    }

    async fn user_profile(&self, user_identifier: &str) -> Result<UserProfile, AdapterError> {
        let steamid = self.resolve_user(user_identifier).await?;
        self.charge(1).await?;
        let summary = self
            .client
            .player_summary(&steamid)
            .await
            .map_err(map_steam_err)?;
        let games = self.owned_games_cached(&steamid).await?;
        let total_playtime_minutes = games.iter().map(|g| g.playtime_forever).sum();
        Ok(UserProfile {
            user_identifier: summary.steamid,
            display_name: summary
                .personaname
                .unwrap_or_else(|| "Unknown".to_string()),
            avatar_url: summary.avatarfull,
            profile_url: summary.profileurl,
            total_games: games.len() as u64,
            total_playtime_minutes,
        })
    }

    async fn count_games(&self, user_identifier: &str) -> Result<u64, AdapterError> {
        let games = self.owned_games_cached(user_identifier).await?;
        Ok(games.len() as u64)
    }

    async fn fetch_batch(
        &self,
        user_identifier: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<NormalizedGame>, AdapterError> {
        let games = self.owned_games_cached(user_identifier).await?;
        let start = (offset as usize).min(games.len());
        let end = (start + limit as usize).min(games.len());
        debug!(user_identifier, start, end, "steam batch sliced from cache");
        Ok(games[start..end].iter().map(transform_owned_game).collect())
    }

    async fn game_details(
        &self,
        platform_game_id: &str,
    ) -> Result<Option<NormalizedGame>, AdapterError> {
        let appid: u64 = platform_game_id
            .parse()
            .map_err(|_| AdapterError::Permanent(format!("bad steam appid '{platform_game_id}'")))?;
        self.charge(1).await?;
        let details = self.client.app_details(appid).await.map_err(map_steam_err)?;
        Ok(details.map(|d| transform_app_details(appid, &d)))
    }

    async fn game_achievements(
        &self,
        platform_game_id: &str,
    ) -> Result<Vec<AchievementDef>, AdapterError> {
        let appid: u64 = platform_game_id
            .parse()
            .map_err(|_| AdapterError::Permanent(format!("bad steam appid '{platform_game_id}'")))?;
        self.charge(1).await?;
        let schema = self.client.game_schema(appid).await.map_err(map_steam_err)?;
        Ok(schema
            .into_iter()
            .map(|a| AchievementDef {
                title: a.display_name.clone().unwrap_or_else(|| a.name.clone()),
                platform_achievement_id: a.name,
                description: a.description,
                icon_url: a.icon,
                hidden: a.hidden == 1,
            })
            .collect())
    }

    async fn user_achievements(
        &self,
        user_identifier: &str,
        platform_game_id: &str,
    ) -> Result<Vec<AchievementUnlock>, AdapterError> {
        let appid: u64 = platform_game_id
            .parse()
            .map_err(|_| AdapterError::Permanent(format!("bad steam appid '{platform_game_id}'")))?;
        let steamid = self.resolve_user(user_identifier).await?;
        self.charge(1).await?;
        let unlocks = self
            .client
            .player_achievements(&steamid, appid)
            .await
            .map_err(map_steam_err)?;
        Ok(unlocks
            .into_iter()
            .filter(|a| a.achieved == 1)
            .map(|a| AchievementUnlock {
                platform_achievement_id: a.apiname,
                unlocked_at: unix_to_datetime(a.unlocktime).unwrap_or_else(Utc::now),
            })
            .collect())
    }
}

fn is_steamid64(s: &str) -> bool {
    s.len() == 17 && s.bytes().all(|b| b.is_ascii_digit())
}

fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// Map one owned-games entry to the universal shape. Pure function of the
/// payload; cover and icon art are synthesized from the known CDN patterns.
fn transform_owned_game(game: &OwnedGame) -> NormalizedGame {
    let title = game
        .name
        .clone()
        .unwrap_or_else(|| format!("App {}", game.appid));
    let mut normalized = NormalizedGame::new(game.appid.to_string(), title);
    normalized.playtime_minutes = game.playtime_forever.max(0);
    normalized.last_played_at = game.rtime_last_played.and_then(unix_to_datetime);
    normalized.cover_image_url = Some(game.capsule_image_url());
    normalized.background_image_url = Some(game.hero_image_url());
    normalized.screenshots = vec![game.header_image_url()];
    normalized.external_ids = ExternalIds {
        steam_appid: Some(game.appid as i64),
        ..ExternalIds::default()
    };
    normalized.platform_data = json!({
        "playtime_2weeks": game.playtime_2weeks.unwrap_or(0),
        "playtime_windows_forever": game.playtime_windows_forever.unwrap_or(0),
        "playtime_mac_forever": game.playtime_mac_forever.unwrap_or(0),
        "playtime_linux_forever": game.playtime_linux_forever.unwrap_or(0),
        "has_community_visible_stats": game.has_community_visible_stats.unwrap_or(false),
        "icon_url": game.icon_url(),
    });
    normalized
}

/// Map a storefront appdetails payload to the universal shape (enrichment).
fn transform_app_details(appid: u64, details: &AppDetails) -> NormalizedGame {
    let title = details
        .name
        .clone()
        .unwrap_or_else(|| format!("App {appid}"));
    let mut normalized = NormalizedGame::new(appid.to_string(), title);
    normalized.description = details.detailed_description.clone();
    normalized.short_description = details.short_description.clone();
    normalized.website_url = details.website.clone();
    normalized.developer = join_nonempty(&details.developers);
    normalized.publisher = join_nonempty(&details.publishers);
    normalized.genres = details
        .genres
        .iter()
        .filter_map(|g| g.description.clone())
        .collect();
    normalized.tags = details
        .categories
        .iter()
        .filter_map(|c| c.description.clone())
        .collect();
    normalized.metacritic_score = details
        .metacritic
        .as_ref()
        .and_then(|m| m.score)
        .map(|s| s as i32);
    normalized.metacritic_url = details.metacritic.as_ref().and_then(|m| m.url.clone());
    normalized.steam_review_count = details
        .recommendations
        .as_ref()
        .and_then(|r| r.total)
        .map(|t| t as i32);
    normalized.release_date = details
        .release_date
        .as_ref()
        .and_then(|r| r.date.as_deref())
        .and_then(parse_release_date);
    normalized.cover_image_url = details.header_image.clone();
    normalized.background_image_url = details.background.clone();
    normalized.screenshots = details
        .screenshots
        .iter()
        .filter_map(|s| s.path_full.clone())
        .collect();
    normalized.external_ids = ExternalIds {
        steam_appid: Some(appid as i64),
        ..ExternalIds::default()
    };
    normalized
}

fn join_nonempty(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}

/// Steam ships release dates in a handful of human formats.
fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%b %d, %Y") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{raw} 1"), "%b %Y %d") {
        return Some(d);
    }
    if let Ok(year) = raw.parse::<i32>() {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

fn map_steam_err(err: SteamError) -> AdapterError {
    match err {
        SteamError::RateLimited { retry_after_secs } => {
            AdapterError::RateLimited { retry_after_secs }
        }
        SteamError::Auth { status } => AdapterError::Auth(format!("steam status {status}")),
        SteamError::NotFound { what } => AdapterError::NotFound(what),
        SteamError::Transport(e) => AdapterError::Transient(e.to_string()),
        SteamError::Decode(e) => AdapterError::Transient(e),
        SteamError::Status { status } if status >= 500 => {
            AdapterError::Transient(format!("steam status {status}"))
        }
        SteamError::Status { status } => AdapterError::Permanent(format!("steam status {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witcher() -> OwnedGame {
        OwnedGame {
            appid: 292030,
            name: Some("The Witcher 3: Wild Hunt".into()),
            playtime_forever: 7620,
            playtime_2weeks: Some(120),
            playtime_windows_forever: Some(7620),
            playtime_mac_forever: Some(0),
            playtime_linux_forever: Some(0),
            rtime_last_played: Some(1_700_000_000),
            img_icon_url: Some("abcdef".into()),
            has_community_visible_stats: Some(true),
        }
    }

    #[test]
    fn transform_maps_core_fields() {
        let n = transform_owned_game(&witcher());
        assert_eq!(n.platform_game_id, "292030");
        assert_eq!(n.title, "The Witcher 3: Wild Hunt");
        assert_eq!(n.playtime_minutes, 7620);
        assert_eq!(n.external_ids.steam_appid, Some(292030));
        assert!(n.last_played_at.is_some());
        assert!(n
            .cover_image_url
            .as_deref()
            .unwrap()
            .contains("292030/library_600x900.jpg"));
        assert_eq!(
            n.platform_data["playtime_2weeks"],
            serde_json::json!(120)
        );
    }

    #[test]
    fn transform_handles_missing_optionals() {
        let g = OwnedGame {
            appid: 1145360,
            name: Some("Hades".into()),
            playtime_forever: 2280,
            playtime_2weeks: None,
            playtime_windows_forever: None,
            playtime_mac_forever: None,
            playtime_linux_forever: None,
            rtime_last_played: Some(0),
            img_icon_url: None,
            has_community_visible_stats: None,
        };
        let n = transform_owned_game(&g);
        assert_eq!(n.playtime_minutes, 2280);
        assert!(n.last_played_at.is_none());
        assert_eq!(n.platform_data["icon_url"], serde_json::Value::Null);
    }

    #[test]
    fn steamid64_detection() {
        assert!(is_steamid64("76561198000000000"));
        assert!(!is_steamid64("gaben"));
        assert!(!is_steamid64("7656119800000000")); // 16 digits
    }

    #[test]
    fn release_date_formats() {
        assert_eq!(
            parse_release_date("May 18, 2015"),
            NaiveDate::from_ymd_opt(2015, 5, 18)
        );
        assert_eq!(
            parse_release_date("Sep 2020"),
            NaiveDate::from_ymd_opt(2020, 9, 1)
        );
        assert_eq!(parse_release_date("2015"), NaiveDate::from_ymd_opt(2015, 1, 1));
        assert_eq!(parse_release_date("Coming soon"), None);
    }

    #[test]
    fn error_classification() {
        assert!(matches!(
            map_steam_err(SteamError::Status { status: 503 }),
            AdapterError::Transient(_)
        ));
        assert!(matches!(
            map_steam_err(SteamError::Status { status: 400 }),
            AdapterError::Permanent(_)
        ));
        assert!(matches!(
            map_steam_err(SteamError::Auth { status: 401 }),
            AdapterError::Auth(_)
        ));
        assert!(matches!(
            map_steam_err(SteamError::RateLimited { retry_after_secs: 120 }),
            AdapterError::RateLimited { retry_after_secs: 120 }
        ));
    }
}
