//! In-process session registry and fan-out. Sessions join rooms (`general`
//! on connect, `library:<id>` on request) and may narrow delivery with an
//! event-type subscription.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

use super::protocol::{ServerFrame, GENERAL_ROOM};

struct Session {
    tx: UnboundedSender<String>,
    rooms: HashSet<String>,
    /// None = no subscription filter, deliver everything the rooms allow.
    events: Option<HashSet<String>>,
    library_filter: Option<Uuid>,
}

#[derive(Default)]
pub struct Hub {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; every session starts in the general room.
    pub fn register(&self, tx: UnboundedSender<String>) -> Uuid {
        let session_id = Uuid::new_v4();
        let mut rooms = HashSet::new();
        rooms.insert(GENERAL_ROOM.to_string());
        self.sessions.lock().unwrap().insert(
            session_id,
            Session {
                tx,
                rooms,
                events: None,
                library_filter: None,
            },
        );
        session_id
    }

    pub fn unregister(&self, session_id: Uuid) {
        self.sessions.lock().unwrap().remove(&session_id);
    }

    pub fn join_room(&self, session_id: Uuid, room: &str) {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(&session_id) {
            s.rooms.insert(room.to_string());
        }
    }

    pub fn leave_room(&self, session_id: Uuid, room: &str) {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(&session_id) {
            s.rooms.remove(room);
        }
    }

    pub fn set_subscription(
        &self,
        session_id: Uuid,
        events: Vec<String>,
        library_filter: Option<Uuid>,
    ) {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(&session_id) {
            s.events = if events.is_empty() {
                None
            } else {
                Some(events.into_iter().collect())
            };
            s.library_filter = library_filter;
        }
    }

    pub fn clear_subscription(&self, session_id: Uuid) {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(&session_id) {
            s.events = None;
            s.library_filter = None;
        }
    }

    /// Direct frame to one session (acks, pongs, errors).
    pub fn send_to(&self, session_id: Uuid, frame: &ServerFrame) {
        if let Some(s) = self.sessions.lock().unwrap().get(&session_id) {
            let _ = s.tx.send(frame.to_json());
        }
    }

    /// Fan an event out to every session whose rooms and subscription accept
    /// it. Delivery is at-least-once while connected; slow consumers hold an
    /// unbounded buffer rather than blocking the publisher.
    pub fn publish(&self, event_type: &str, library_id: Option<Uuid>, data: Value) {
        let frame = ServerFrame::new(event_type, data).to_json();
        let rooms: Vec<String> = match library_id {
            Some(id) => vec![GENERAL_ROOM.to_string(), super::protocol::library_room(id)],
            None => vec![GENERAL_ROOM.to_string()],
        };
        let sessions = self.sessions.lock().unwrap();
        let mut delivered = 0usize;
        for session in sessions.values() {
            if !rooms.iter().any(|r| session.rooms.contains(r)) {
                continue;
            }
            if let Some(events) = &session.events {
                if !events.contains(event_type) {
                    continue;
                }
            }
            if let (Some(filter), Some(event_lib)) = (session.library_filter, library_id) {
                if filter != event_lib {
                    continue;
                }
            }
            let _ = session.tx.send(frame.clone());
            delivered += 1;
        }
        debug!(event_type, delivered, "realtime event published");
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::protocol::{library_room, EV_SYNC_PROGRESS};
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn general_room_receives_library_events() {
        let hub = Hub::new();
        let (tx, mut rx) = unbounded_channel();
        let _sid = hub.register(tx);
        hub.publish(EV_SYNC_PROGRESS, Some(Uuid::new_v4()), serde_json::json!({"p": 1}));
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("sync_progress"));
    }

    #[test]
    fn subscription_filter_narrows_delivery() {
        let hub = Hub::new();
        let (tx, mut rx) = unbounded_channel();
        let sid = hub.register(tx);
        hub.set_subscription(sid, vec!["sync_completed".to_string()], None);
        hub.publish(EV_SYNC_PROGRESS, None, serde_json::json!({}));
        assert!(rx.try_recv().is_err());
        hub.publish("sync_completed", None, serde_json::json!({}));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn library_filter_gates_other_libraries() {
        let hub = Hub::new();
        let (tx, mut rx) = unbounded_channel();
        let sid = hub.register(tx);
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        hub.set_subscription(sid, vec![], Some(mine));
        hub.publish(EV_SYNC_PROGRESS, Some(other), serde_json::json!({}));
        assert!(rx.try_recv().is_err());
        hub.publish(EV_SYNC_PROGRESS, Some(mine), serde_json::json!({}));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn leaving_a_room_stops_room_only_delivery() {
        let hub = Hub::new();
        let (tx, mut rx) = unbounded_channel();
        let sid = hub.register(tx);
        let lib = Uuid::new_v4();
        hub.leave_room(sid, GENERAL_ROOM);
        hub.publish(EV_SYNC_PROGRESS, Some(lib), serde_json::json!({}));
        assert!(rx.try_recv().is_err());
        hub.join_room(sid, &library_room(lib));
        hub.publish(EV_SYNC_PROGRESS, Some(lib), serde_json::json!({}));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn unregister_drops_session() {
        let hub = Hub::new();
        let (tx, _rx) = unbounded_channel();
        let sid = hub.register(tx);
        assert_eq!(hub.session_count(), 1);
        hub.unregister(sid);
        assert_eq!(hub.session_count(), 0);
    }
}
