//! WebSocket client for the rendezvous server: registers the local node id
//! and relays SIGNAL traffic until the overlay is dense enough for the
//! [`super::router::SignalingRouter`] to prefer DHT-routed control signals.
//!
//! The rendezvous is a dumb fan-out relay (spec §6.2): it interprets
//! `REGISTER`/`GET_PEERS` but otherwise just forwards `signal` payloads
//! between clients, so this client only needs the thinnest possible
//! envelope — unlike the peer-to-peer `SIGNAL` message (§6.1), no ttl or
//! path bookkeeping travels over this link.

use crate::id::NodeId;
use crate::messages::{MessageError, SignalPayload};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("rendezvous websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode/decode rendezvous frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signal payload invalid: {0}")]
    InvalidSignal(#[from] MessageError),
    #[error("rendezvous connection is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendezvousClientState {
    Connecting,
    Registered,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "REGISTER")]
    Register {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    #[serde(rename = "SIGNAL")]
    Signal { target: NodeId, signal: SignalPayload },
    #[serde(rename = "GET_PEERS")]
    GetPeers,
}

/// Server → client frames, per spec §6.2.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "REGISTERED")]
    Registered,
    #[serde(rename = "PEER_LIST")]
    PeerList { peers: Vec<NodeId> },
    #[serde(rename = "SIGNAL")]
    Signal { id: NodeId, signal: SignalPayload },
}

/// Events surfaced to the node's dispatcher from the rendezvous connection.
#[derive(Debug, Clone)]
pub enum RendezvousEvent {
    Registered,
    PeerList(Vec<NodeId>),
    Signal { from: NodeId, signal: SignalPayload },
    Closed,
}

/// A connection to the well-known rendezvous endpoint. Registration and
/// roster/signal relay only; the rendezvous performs no interpretation of
/// `signal` payloads beyond what's needed to route them.
pub struct RendezvousClient {
    node_id: NodeId,
    state: Arc<Mutex<RendezvousClientState>>,
    write: Arc<Mutex<WsWriter>>,
}

impl RendezvousClient {
    /// Connect and spawn the background frame-reader task. Returns the
    /// client handle plus a channel of decoded events.
    pub async fn connect(
        url: &str,
        node_id: NodeId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RendezvousEvent>), RendezvousError> {
        let (ws, _response) = connect_async(url).await?;
        let (write, mut read) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(RendezvousClientState::Connecting));

        let reader_state = state.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Registered) => {
                            *reader_state.lock().await = RendezvousClientState::Registered;
                            let _ = tx.send(RendezvousEvent::Registered);
                        }
                        Ok(ServerMessage::PeerList { peers }) => {
                            let _ = tx.send(RendezvousEvent::PeerList(peers));
                        }
                        Ok(ServerMessage::Signal { id, signal }) => {
                            let _ = tx.send(RendezvousEvent::Signal { from: id, signal });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "rendezvous sent a malformed frame, dropping");
                        }
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "rendezvous connection error");
                        break;
                    }
                }
            }
            *reader_state.lock().await = RendezvousClientState::Closed;
            let _ = tx.send(RendezvousEvent::Closed);
        });

        Ok((
            Self {
                node_id,
                state,
                write: Arc::new(Mutex::new(write)),
            },
            rx,
        ))
    }

    pub async fn register(&self) -> Result<(), RendezvousError> {
        self.send(&ClientMessage::Register { node_id: self.node_id }).await
    }

    pub async fn send_signal(&self, target: NodeId, signal: SignalPayload) -> Result<(), RendezvousError> {
        signal.validate()?;
        self.send(&ClientMessage::Signal { target, signal }).await
    }

    pub async fn request_peers(&self) -> Result<(), RendezvousError> {
        self.send(&ClientMessage::GetPeers).await
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), RendezvousError> {
        let json = serde_json::to_string(msg)?;
        let mut write = self.write.lock().await;
        write
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(RendezvousError::from)
    }

    pub async fn state(&self) -> RendezvousClientState {
        *self.state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    #[test]
    fn register_frame_serializes_with_wire_field_names() {
        let msg = ClientMessage::Register { node_id: id(1) };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"REGISTER\""));
        assert!(json.contains("\"nodeId\""));
    }

    #[test]
    fn signal_frame_round_trips_offer() {
        let msg = ClientMessage::Signal {
            target: id(2),
            signal: SignalPayload::Offer { sdp: "v=0".into() },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"SIGNAL\""));
        assert!(json.contains("\"sdp\":\"v=0\""));
    }

    #[test]
    fn server_peer_list_decodes() {
        let json = format!(
            "{{\"type\":\"PEER_LIST\",\"peers\":[\"{}\"]}}",
            id(3).to_hex()
        );
        let msg: ServerMessage = serde_json::from_str(&json).unwrap();
        match msg {
            ServerMessage::PeerList { peers } => assert_eq!(peers, vec![id(3)]),
            _ => panic!("expected PeerList"),
        }
    }
}
