//! Wire protocol for the realtime channel. Every outbound frame is
//! `{type, data, timestamp, id}`; inbound frames are tagged by `type`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// Server -> client event catalogue.
pub const EV_CONNECTION_ESTABLISHED: &str = "connection_established";
pub const EV_PONG: &str = "pong";
pub const EV_SYNC_STARTED: &str = "sync_started";
pub const EV_SYNC_PROGRESS: &str = "sync_progress";
pub const EV_SYNC_COMPLETED: &str = "sync_completed";
pub const EV_SYNC_FAILED: &str = "sync_failed";
pub const EV_SYNC_RATE_LIMITED: &str = "sync_rate_limited";
pub const EV_SYNC_CANCELLED: &str = "sync_cancelled";
pub const EV_GAME_ADDED: &str = "game_added";
pub const EV_GAME_UPDATED: &str = "game_updated";
pub const EV_ACHIEVEMENT_UNLOCKED: &str = "achievement_unlocked";
pub const EV_SYSTEM_NOTIFICATION: &str = "system_notification";
pub const EV_RATE_LIMIT_WARNING: &str = "rate_limit_warning";
pub const EV_CONNECTION_ERROR: &str = "connection_error";

#[derive(Debug, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: String,
    pub id: String,
}

impl ServerFrame {
    pub fn new(event_type: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now().to_rfc3339(),
            id: Uuid::new_v4().to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeFilters {
    #[serde(default)]
    pub library_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate {
        token: String,
    },
    Subscribe {
        #[serde(default)]
        events: Vec<String>,
        #[serde(default)]
        filters: SubscribeFilters,
    },
    Unsubscribe,
    JoinLibrary {
        library_id: Uuid,
    },
    LeaveLibrary {
        library_id: Uuid,
    },
    Ping,
    /// Opaque to this core; acknowledged and dropped.
    AiChatMessage {
        #[serde(default)]
        #[allow(dead_code)]
        message: Value,
    },
}

pub fn library_room(library_id: Uuid) -> String {
    format!("library:{library_id}")
}

pub const GENERAL_ROOM: &str = "general";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frame_shape() {
        let frame = ServerFrame::new(EV_SYNC_PROGRESS, serde_json::json!({"games_processed": 89}));
        let parsed: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(parsed["type"], "sync_progress");
        assert_eq!(parsed["data"]["games_processed"], 89);
        assert!(parsed["timestamp"].is_string());
        assert!(parsed["id"].is_string());
    }

    #[test]
    fn client_frames_decode() {
        let sub: ClientFrame = serde_json::from_str(
            r#"{"type":"subscribe","events":["sync_progress"],"filters":{"library_id":"7f3e7d8a-32cd-4a1a-9d30-5b1f0a1f2b3c"}}"#,
        )
        .unwrap();
        match sub {
            ClientFrame::Subscribe { events, filters } => {
                assert_eq!(events, vec!["sync_progress"]);
                assert!(filters.library_id.is_some());
            }
            _ => panic!("wrong variant"),
        }

        let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientFrame::Ping));

        let join: ClientFrame = serde_json::from_str(
            r#"{"type":"join_library","library_id":"7f3e7d8a-32cd-4a1a-9d30-5b1f0a1f2b3c"}"#,
        )
        .unwrap();
        assert!(matches!(join, ClientFrame::JoinLibrary { .. }));
    }

    #[test]
    fn room_naming() {
        let id = Uuid::nil();
        assert_eq!(
            library_room(id),
            "library:00000000-0000-0000-0000-000000000000"
        );
    }
}
