//! Minimal typed client for the Steam Web API and the storefront appdetails
//! endpoint. Request pacing is owned by the caller; this crate only knows how
//! to talk HTTP, decode payloads, and classify failures.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.steampowered.com";
const DEFAULT_STORE_BASE: &str = "https://store.steampowered.com";

/// Steam media CDN roots. Cover/capsule art is addressable purely from the
/// appid; icon art additionally needs the hash returned by GetOwnedGames.
pub const CDN_APP_BASE: &str = "https://cdn.cloudflare.steamstatic.com/steam/apps";
pub const CDN_ICON_BASE: &str = "https://media.steampowered.com/steamcommunity/public/images/apps";

#[derive(Debug, Error)]
pub enum SteamError {
    #[error("steam rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("steam auth rejected (status {status})")]
    Auth { status: u16 },
    #[error("steam resource not found: {what}")]
    NotFound { what: String },
    #[error("steam http status {status}")]
    Status { status: u16 },
    #[error("steam transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("steam payload decode error: {0}")]
    Decode(String),
}

impl SteamError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SteamError::Transport(_) => true,
            SteamError::Status { status } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SteamConfig {
    pub api_key: String,
    pub api_base: String,
    pub store_base: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl SteamConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            store_base: DEFAULT_STORE_BASE.to_string(),
            timeout_secs: 20,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Clone)]
pub struct SteamClient {
    cfg: SteamConfig,
    http: Client,
}

// ---------------- payload types ----------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Default, Deserialize)]
pub struct OwnedGamesResponse {
    #[serde(default)]
    pub game_count: u64,
    #[serde(default)]
    pub games: Vec<OwnedGame>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedGame {
    pub appid: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub playtime_forever: i64,
    #[serde(default)]
    pub playtime_2weeks: Option<i64>,
    #[serde(default)]
    pub playtime_windows_forever: Option<i64>,
    #[serde(default)]
    pub playtime_mac_forever: Option<i64>,
    #[serde(default)]
    pub playtime_linux_forever: Option<i64>,
    #[serde(default)]
    pub rtime_last_played: Option<i64>,
    #[serde(default)]
    pub img_icon_url: Option<String>,
    #[serde(default)]
    pub has_community_visible_stats: Option<bool>,
}

impl OwnedGame {
    /// Library header art served straight off the app CDN.
    pub fn header_image_url(&self) -> String {
        format!("{CDN_APP_BASE}/{}/header.jpg", self.appid)
    }

    /// Vertical capsule used as cover art in library views.
    pub fn capsule_image_url(&self) -> String {
        format!("{CDN_APP_BASE}/{}/library_600x900.jpg", self.appid)
    }

    pub fn hero_image_url(&self) -> String {
        format!("{CDN_APP_BASE}/{}/library_hero.jpg", self.appid)
    }

    /// Small icon; only addressable when GetOwnedGames returned the hash.
    pub fn icon_url(&self) -> Option<String> {
        self.img_icon_url
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(|h| format!("{CDN_ICON_BASE}/{}/{h}.jpg", self.appid))
    }
}

#[derive(Debug, Deserialize)]
struct PlayerSummariesResponse {
    #[serde(default)]
    players: Vec<PlayerSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerSummary {
    pub steamid: String,
    #[serde(default)]
    pub personaname: Option<String>,
    #[serde(default)]
    pub avatarfull: Option<String>,
    #[serde(default)]
    pub profileurl: Option<String>,
    #[serde(default)]
    pub communityvisibilitystate: Option<i32>,
    #[serde(default)]
    pub timecreated: Option<i64>,
    #[serde(default)]
    pub loccountrycode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VanityResponse {
    #[serde(default)]
    success: i32,
    #[serde(default)]
    steamid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SchemaEnvelope {
    #[serde(default)]
    game: SchemaGame,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaGame {
    #[serde(default, rename = "availableGameStats")]
    available_game_stats: SchemaStats,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaStats {
    #[serde(default)]
    achievements: Vec<SchemaAchievement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaAchievement {
    pub name: String,
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub hidden: i32,
}

#[derive(Debug, Deserialize)]
struct PlayerStatsEnvelope {
    #[serde(default)]
    playerstats: PlayerStats,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerStats {
    #[serde(default)]
    achievements: Vec<PlayerAchievement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerAchievement {
    pub apiname: String,
    #[serde(default)]
    pub achieved: i32,
    #[serde(default)]
    pub unlocktime: i64,
}

/// Subset of the storefront appdetails payload used for catalog enrichment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub detailed_description: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub developers: Vec<String>,
    #[serde(default)]
    pub publishers: Vec<String>,
    #[serde(default)]
    pub genres: Vec<DescriptionEntry>,
    #[serde(default)]
    pub categories: Vec<DescriptionEntry>,
    #[serde(default)]
    pub metacritic: Option<MetacriticEntry>,
    #[serde(default)]
    pub recommendations: Option<RecommendationsEntry>,
    #[serde(default)]
    pub release_date: Option<ReleaseDateEntry>,
    #[serde(default)]
    pub header_image: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub screenshots: Vec<ScreenshotEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescriptionEntry {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetacriticEntry {
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationsEntry {
    #[serde(default)]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseDateEntry {
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotEntry {
    #[serde(default)]
    pub path_full: Option<String>,
}

// ---------------- client ----------------

impl SteamClient {
    pub fn new(cfg: SteamConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { cfg, http }
    }

    /// Full owned-games listing for a SteamID64. The whole library arrives in
    /// one response; callers page over it locally.
    pub async fn owned_games(&self, steamid: &str) -> Result<OwnedGamesResponse, SteamError> {
        let url = format!("{}/IPlayerService/GetOwnedGames/v1/", self.cfg.api_base);
        let body: Envelope<OwnedGamesResponse> = self
            .get_json(
                &url,
                &[
                    ("key", self.cfg.api_key.as_str()),
                    ("steamid", steamid),
                    ("include_appinfo", "1"),
                    ("include_played_free_games", "1"),
                    ("format", "json"),
                ],
            )
            .await?;
        Ok(body.response)
    }

    pub async fn player_summary(&self, steamid: &str) -> Result<PlayerSummary, SteamError> {
        let url = format!("{}/ISteamUser/GetPlayerSummaries/v2/", self.cfg.api_base);
        let body: Envelope<PlayerSummariesResponse> = self
            .get_json(
                &url,
                &[
                    ("key", self.cfg.api_key.as_str()),
                    ("steamids", steamid),
                    ("format", "json"),
                ],
            )
            .await?;
        body.response
            .players
            .into_iter()
            .next()
            .ok_or_else(|| SteamError::NotFound {
                what: format!("steam user {steamid}"),
            })
    }

    /// Resolve a vanity profile name to a SteamID64. Returns `None` when the
    /// vanity name is unknown (the API reports success=42 for no-match).
    pub async fn resolve_vanity_url(&self, vanity: &str) -> Result<Option<String>, SteamError> {
        let url = format!("{}/ISteamUser/ResolveVanityURL/v1/", self.cfg.api_base);
        let body: Envelope<VanityResponse> = self
            .get_json(
                &url,
                &[
                    ("key", self.cfg.api_key.as_str()),
                    ("vanityurl", vanity),
                    ("format", "json"),
                ],
            )
            .await?;
        if body.response.success == 1 {
            Ok(body.response.steamid)
        } else {
            Ok(None)
        }
    }

    pub async fn game_schema(&self, appid: u64) -> Result<Vec<SchemaAchievement>, SteamError> {
        let url = format!("{}/ISteamUserStats/GetSchemaForGame/v2/", self.cfg.api_base);
        let appid_s = appid.to_string();
        let body: SchemaEnvelope = self
            .get_json(
                &url,
                &[
                    ("key", self.cfg.api_key.as_str()),
                    ("appid", appid_s.as_str()),
                    ("format", "json"),
                ],
            )
            .await?;
        Ok(body.game.available_game_stats.achievements)
    }

    pub async fn player_achievements(
        &self,
        steamid: &str,
        appid: u64,
    ) -> Result<Vec<PlayerAchievement>, SteamError> {
        let url = format!(
            "{}/ISteamUserStats/GetPlayerAchievements/v1/",
            self.cfg.api_base
        );
        let appid_s = appid.to_string();
        let body: PlayerStatsEnvelope = self
            .get_json(
                &url,
                &[
                    ("key", self.cfg.api_key.as_str()),
                    ("steamid", steamid),
                    ("appid", appid_s.as_str()),
                    ("format", "json"),
                ],
            )
            .await?;
        Ok(body.playerstats.achievements)
    }

    /// Storefront appdetails for a single app. The storefront wraps each app
    /// in `{ "<appid>": {"success": bool, "data": {...}} }`.
    pub async fn app_details(&self, appid: u64) -> Result<Option<AppDetails>, SteamError> {
        let url = format!("{}/api/appdetails", self.cfg.store_base);
        let appid_s = appid.to_string();
        let body: Value = self
            .get_json(
                &url,
                &[("appids", appid_s.as_str()), ("cc", "us"), ("l", "en")],
            )
            .await?;
        let Some(entry) = body.get(&appid_s) else {
            return Ok(None);
        };
        if !entry.get("success").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(None);
        }
        match entry.get("data") {
            Some(data) => serde_json::from_value(data.clone())
                .map(Some)
                .map_err(|e| SteamError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SteamError> {
        let mut attempt: u32 = 0;
        loop {
            match self.get_json_once(url, query).await {
                Ok(v) => return Ok(v),
                Err(err) if err.is_transient() && attempt < self.cfg.retry_attempts => {
                    let delay = self.cfg.retry_base_delay_ms.saturating_mul(1 << attempt);
                    warn!(url, attempt, delay_ms = delay, error = %err, "steam request retry");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_json_once<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SteamError> {
        debug!(url, "steam api request");
        let resp = self.http.get(url).query(query).send().await?;
        let status = resp.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = resp
                    .headers()
                    .get("Retry-After")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(SteamError::RateLimited { retry_after_secs })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SteamError::Auth {
                status: status.as_u16(),
            }),
            StatusCode::NOT_FOUND => Err(SteamError::NotFound {
                what: url.to_string(),
            }),
            s if s.is_success() => resp
                .json::<T>()
                .await
                .map_err(|e| SteamError::Decode(e.to_string())),
            s => Err(SteamError::Status { status: s.as_u16() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_owned_games_payload() {
        let raw = r#"{
            "response": {
                "game_count": 2,
                "games": [
                    {"appid": 292030, "name": "The Witcher 3: Wild Hunt",
                     "playtime_forever": 7620, "rtime_last_played": 1700000000,
                     "img_icon_url": "abcdef0123456789"},
                    {"appid": 1145360, "name": "Hades", "playtime_forever": 2280}
                ]
            }
        }"#;
        let env: Envelope<OwnedGamesResponse> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.response.game_count, 2);
        assert_eq!(env.response.games[0].appid, 292030);
        assert_eq!(env.response.games[0].playtime_forever, 7620);
        assert_eq!(env.response.games[1].rtime_last_played, None);
    }

    #[test]
    fn synthesizes_cdn_urls_from_appid_and_hash() {
        let game = OwnedGame {
            appid: 292030,
            name: Some("The Witcher 3: Wild Hunt".into()),
            playtime_forever: 7620,
            playtime_2weeks: None,
            playtime_windows_forever: None,
            playtime_mac_forever: None,
            playtime_linux_forever: None,
            rtime_last_played: None,
            img_icon_url: Some("deadbeef".into()),
            has_community_visible_stats: None,
        };
        assert_eq!(
            game.header_image_url(),
            "https://cdn.cloudflare.steamstatic.com/steam/apps/292030/header.jpg"
        );
        assert_eq!(
            game.icon_url().unwrap(),
            "https://media.steampowered.com/steamcommunity/public/images/apps/292030/deadbeef.jpg"
        );
        let no_hash = OwnedGame {
            img_icon_url: None,
            ..game
        };
        assert!(no_hash.icon_url().is_none());
    }

    #[test]
    fn vanity_miss_decodes_to_none() {
        let raw = r#"{"response": {"success": 42, "message": "No match"}}"#;
        let env: Envelope<VanityResponse> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.response.success, 42);
        assert!(env.response.steamid.is_none());
    }

    #[test]
    fn transient_classification_covers_5xx_and_transport() {
        assert!(SteamError::Status { status: 502 }.is_transient());
        assert!(!SteamError::Status { status: 400 }.is_transient());
        assert!(!SteamError::Auth { status: 403 }.is_transient());
        assert!(!SteamError::RateLimited { retry_after_secs: 1 }.is_transient());
    }
}
