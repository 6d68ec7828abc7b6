// API request/response models (DTOs)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::models::{GameStatus, OperationType, SyncStatus};

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub pages: i64,
    pub total: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, page: i64, limit: i64, total: i64) -> Self {
        let pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self {
            items,
            page,
            pages,
            total,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}
fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct PlatformsQuery {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateLibraryRequest {
    pub platform_id: Uuid,
    pub user_identifier: String,
    pub display_name: String,
    #[serde(default)]
    pub credentials: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateLibraryRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub credentials: Option<Value>,
    #[serde(default)]
    pub sync_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub sync_type: Option<String>,
}

impl SyncRequest {
    /// Wire names: manual | incremental | full. Unknown values are a
    /// validation error at the handler.
    pub fn operation_type(&self) -> Result<OperationType, String> {
        match self.sync_type.as_deref() {
            None | Some("manual") => Ok(OperationType::ManualSync),
            Some("incremental") => Ok(OperationType::IncrementalSync),
            Some("full") => Ok(OperationType::FullSync),
            Some(other) => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SyncAccepted {
    pub library_id: Uuid,
    pub job_id: Uuid,
    pub status: SyncStatus,
    pub queue: &'static str,
    pub message: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CancelAccepted {
    pub library_id: Uuid,
    pub message: String,
}

/// Fallback sync-status body assembled from the library row when no progress
/// snapshot is live.
#[derive(Debug, Serialize)]
pub struct SyncStatusFallback {
    pub library_id: Uuid,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
    /// Comma-separated platform codes.
    #[serde(default)]
    pub platforms: Option<String>,
    /// Comma-separated game statuses.
    #[serde(default)]
    pub statuses: Option<String>,
    #[serde(default)]
    pub genres: Option<String>,
    #[serde(default)]
    pub min_metacritic: Option<i32>,
    #[serde(default)]
    pub max_metacritic: Option<i32>,
    #[serde(default)]
    pub owned_only: bool,
    #[serde(default)]
    pub library_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl SearchQuery {
    pub fn split_csv(raw: &Option<String>) -> Vec<String> {
        raw.as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn parse_statuses(&self) -> Result<Vec<GameStatus>, String> {
        Self::split_csv(&self.statuses)
            .into_iter()
            .map(|s| {
                serde_json::from_value::<GameStatus>(Value::String(s.clone()))
                    .map_err(|_| s)
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct GameDetailQuery {
    #[serde(default)]
    pub library_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_type_wire_names() {
        let req = SyncRequest {
            force: false,
            sync_type: Some("full".into()),
        };
        assert_eq!(req.operation_type().unwrap(), OperationType::FullSync);
        let req = SyncRequest {
            force: false,
            sync_type: None,
        };
        assert_eq!(req.operation_type().unwrap(), OperationType::ManualSync);
        let req = SyncRequest {
            force: false,
            sync_type: Some("weekly".into()),
        };
        assert!(req.operation_type().is_err());
    }

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        let raw = Some(" steam, gog ,,epic ".to_string());
        assert_eq!(SearchQuery::split_csv(&raw), vec!["steam", "gog", "epic"]);
        assert!(SearchQuery::split_csv(&None).is_empty());
    }

    #[test]
    fn status_parse_rejects_unknown() {
        let q = SearchQuery {
            q: None,
            platforms: None,
            statuses: Some("playing,retired".into()),
            genres: None,
            min_metacritic: None,
            max_metacritic: None,
            owned_only: false,
            library_id: None,
            page: 1,
            limit: 50,
        };
        assert_eq!(q.parse_statuses().unwrap_err(), "retired");
    }

    #[test]
    fn pagination_math() {
        let p = Paginated::new(vec![1, 2, 3], 1, 50, 101);
        assert_eq!(p.pages, 3);
        let empty: Paginated<i32> = Paginated::new(vec![], 1, 50, 0);
        assert_eq!(empty.pages, 0);
    }
}
