//! Bridge from Postgres NOTIFY channels into the in-process hub. Worker
//! processes publish progress through the database, so one LISTEN connection
//! here makes the bus span process boundaries.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, NoTls};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::hub::Hub;
use crate::sync::progress::{ProgressEvent, PROGRESS_CHANNEL};

/// Secondary channel for catalog-side events (game_added, game_updated,
/// achievement_unlocked, system_notification).
pub const LIBRARY_CHANNEL: &str = "library_events";

/// Connect, LISTEN, and forward notifications into the hub until the
/// connection drops. The caller is expected to supervise and reconnect.
///
/// The DSN must be a direct session connection; LISTEN does not survive
/// transaction-pooled connections.
pub async fn run_bridge(bus_url: &str, hub: Arc<Hub>) -> Result<()> {
    let (client, mut connection) = tokio_postgres::connect(bus_url, NoTls)
        .await
        .context("connecting LISTEN session")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<tokio_postgres::Notification>();
    tokio::spawn(async move {
        let mut stream =
            futures::stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    if tx.send(n).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "LISTEN connection error");
                    break;
                }
            }
        }
    });

    client
        .batch_execute(&format!("LISTEN {PROGRESS_CHANNEL}; LISTEN {LIBRARY_CHANNEL};"))
        .await
        .context("issuing LISTEN")?;
    info!("realtime bridge listening on {PROGRESS_CHANNEL} and {LIBRARY_CHANNEL}");

    while let Some(notification) = rx.recv().await {
        match notification.channel() {
            PROGRESS_CHANNEL => forward_progress(&hub, notification.payload()),
            LIBRARY_CHANNEL => forward_library_event(&hub, notification.payload()),
            other => warn!(channel = other, "notification on unexpected channel"),
        }
    }
    // Keep the client alive until the stream ends.
    drop(client);
    Err(anyhow::anyhow!("LISTEN bridge connection closed"))
}

fn forward_progress(hub: &Hub, payload: &str) {
    let event: ProgressEvent = match serde_json::from_str(payload) {
        Ok(e) => e,
        Err(err) => {
            warn!(error = %err, "undecodable progress payload");
            return;
        }
    };
    let event_type = event.status.event_type();
    let library_id = event.library_id;
    match serde_json::to_value(&event) {
        Ok(data) => hub.publish(event_type, Some(library_id), data),
        Err(err) => warn!(error = %err, "progress re-encode failed"),
    }
}

/// Library-channel payloads are pre-framed: `{"type": ..., "library_id":
/// ..., "data": {...}}`.
fn forward_library_event(hub: &Hub, payload: &str) {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "undecodable library event payload");
            return;
        }
    };
    let Some(event_type) = value.get("type").and_then(Value::as_str) else {
        warn!("library event missing type");
        return;
    };
    let library_id = value
        .get("library_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok());
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    hub.publish(event_type, library_id, data);
}

/// Supervisor: keep the bridge alive with a fixed reconnect pause.
pub async fn run_bridge_supervised(bus_url: String, hub: Arc<Hub>) {
    loop {
        if let Err(err) = run_bridge(&bus_url, hub.clone()).await {
            error!(error = %err, "realtime bridge dropped, reconnecting in 5s");
        }
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    }
}
