//! WebSocket endpoint for the realtime bus: accept, optionally authenticate,
//! then serve subscribe/join/leave/ping until the peer goes away.

use std::sync::Arc;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message;

use super::hub::Hub;
use super::protocol::{
    library_room, ClientFrame, ServerFrame, EV_CONNECTION_ERROR, EV_CONNECTION_ESTABLISHED,
    EV_PONG,
};

#[derive(Clone)]
pub struct RealtimeServer {
    hub: Arc<Hub>,
    /// None = auth bypass (reverse-proxy deployment).
    auth_token: Option<String>,
}

impl RealtimeServer {
    pub fn new(hub: Arc<Hub>, auth_token: Option<String>) -> Self {
        Self { hub, auth_token }
    }

    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, auth = self.auth_token.is_some(), "realtime server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    debug!(%peer, error = %err, "realtime connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let ws = accept_async(stream).await?;
        let (mut write, mut read) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let session_id = self.hub.register(tx);
        let mut authenticated = self.auth_token.is_none();

        self.hub.send_to(
            session_id,
            &ServerFrame::new(
                EV_CONNECTION_ESTABLISHED,
                json!({
                    "session_id": session_id,
                    "auth_required": self.auth_token.is_some(),
                }),
            ),
        );

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if write.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = read.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    debug!(%session_id, error = %e, "websocket read error");
                    break;
                }
            };
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => {
                            if !self.handle_frame(session_id, frame, &mut authenticated) {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(%session_id, error = %err, "unparseable client frame");
                            self.hub.send_to(
                                session_id,
                                &ServerFrame::new(
                                    EV_CONNECTION_ERROR,
                                    json!({"message": "unrecognized message"}),
                                ),
                            );
                        }
                    }
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => break,
                Message::Binary(_) | Message::Frame(_) => {}
            }
        }

        self.hub.unregister(session_id);
        writer.abort();
        Ok(())
    }

    /// Returns false when the connection must be torn down.
    fn handle_frame(
        &self,
        session_id: uuid::Uuid,
        frame: ClientFrame,
        authenticated: &mut bool,
    ) -> bool {
        if !*authenticated {
            return match frame {
                ClientFrame::Authenticate { token } => {
                    if Some(&token) == self.auth_token.as_ref() {
                        *authenticated = true;
                        true
                    } else {
                        self.hub.send_to(
                            session_id,
                            &ServerFrame::new(
                                EV_CONNECTION_ERROR,
                                json!({"message": "authentication failed"}),
                            ),
                        );
                        false
                    }
                }
                _ => {
                    self.hub.send_to(
                        session_id,
                        &ServerFrame::new(
                            EV_CONNECTION_ERROR,
                            json!({"message": "authenticate first"}),
                        ),
                    );
                    false
                }
            };
        }

        match frame {
            ClientFrame::Authenticate { .. } => {}
            ClientFrame::Subscribe { events, filters } => {
                self.hub
                    .set_subscription(session_id, events, filters.library_id);
            }
            ClientFrame::Unsubscribe => self.hub.clear_subscription(session_id),
            ClientFrame::JoinLibrary { library_id } => {
                self.hub.join_room(session_id, &library_room(library_id));
            }
            ClientFrame::LeaveLibrary { library_id } => {
                self.hub.leave_room(session_id, &library_room(library_id));
            }
            ClientFrame::Ping => {
                self.hub
                    .send_to(session_id, &ServerFrame::new(EV_PONG, json!({})));
            }
            ClientFrame::AiChatMessage { .. } => {
                // Owned by the AI collaborator; nothing to do here.
            }
        }
        true
    }
}
