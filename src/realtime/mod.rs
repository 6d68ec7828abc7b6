//! Realtime progress bus: WebSocket sessions with room semantics, fed by
//! Postgres LISTEN/NOTIFY so events from worker processes reach API-side
//! subscribers.

pub mod hub;
pub mod listener;
pub mod protocol;
pub mod server;

pub use hub::Hub;
pub use server::RealtimeServer;
