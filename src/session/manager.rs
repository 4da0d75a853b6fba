//! Session lifecycle and the peer session map.

use super::transport::{DataChannel, DataChannelError};
use crate::id::NodeId;
use crate::messages::{Message, MessageError};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("peer limit reached and incoming peer is not closer than the current furthest peer")]
    PeerLimitReached,
    #[error("no session exists for peer {0}")]
    NoSuchSession(NodeId),
    #[error("data channel error: {0}")]
    Channel(#[from] DataChannelError),
    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Gathering,
    Connecting,
    Connected,
    Closed,
    Failed,
}

/// Events a session or the manager emits, consumed by the owning node.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected(NodeId),
    Data(NodeId, Vec<u8>),
    Message(NodeId, Box<Message>),
    Close(NodeId, String),
    Error(NodeId, String),
    PeerLimitReached(NodeId),
}

/// One remote peer's session state.
pub struct Session {
    pub peer_id: NodeId,
    pub role: Role,
    pub state: SessionState,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    pub dht_capable: bool,
    pending_inbound_signals: VecDeque<Message>,
    channel: Option<Arc<dyn DataChannel>>,
}

impl Session {
    fn new(peer_id: NodeId, role: Role) -> Self {
        let now = Instant::now();
        Self {
            peer_id,
            role,
            state: SessionState::Gathering,
            created_at: now,
            last_activity_at: now,
            dht_capable: false,
            pending_inbound_signals: VecDeque::new(),
            channel: None,
        }
    }

    pub fn queue_inbound_signal(&mut self, msg: Message) {
        self.pending_inbound_signals.push_back(msg);
    }

    pub fn drain_pending_signals(&mut self) -> Vec<Message> {
        self.pending_inbound_signals.drain(..).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.channel.as_ref().is_some_and(|c| c.is_open())
    }
}

/// Owns the set of active sessions, keyed by remote node id.
pub struct PeerSessionManager {
    local_id: NodeId,
    sessions: HashMap<NodeId, Session>,
    max_peers: Option<usize>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl PeerSessionManager {
    #[must_use]
    pub fn new(local_id: NodeId, max_peers: Option<usize>) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                local_id,
                sessions: HashMap::new(),
                max_peers,
                events_tx: tx,
            },
            rx,
        )
    }

    /// Lexicographically smaller id is initiator, per spec's glare-avoidance
    /// rule.
    #[must_use]
    pub fn initiator_role(local_id: NodeId, remote_id: NodeId) -> Role {
        if local_id < remote_id {
            Role::Initiator
        } else {
            Role::Responder
        }
    }

    /// Begin tracking a session for `peer_id`, applying the peer-limit
    /// eviction policy if the manager is at capacity.
    pub fn open(&mut self, peer_id: NodeId) -> Result<(), SessionError> {
        if self.sessions.contains_key(&peer_id) {
            return Ok(());
        }
        if let Some(cap) = self.max_peers {
            if self.sessions.len() >= cap {
                match self.select_eviction_victim(peer_id) {
                    Some(victim) => {
                        self.close(&victim, "evicted: peer limit reached".into());
                    }
                    None => {
                        let _ = self.events_tx.send(SessionEvent::PeerLimitReached(peer_id));
                        return Err(SessionError::PeerLimitReached);
                    }
                }
            }
        }
        let role = Self::initiator_role(self.local_id, peer_id);
        self.sessions.insert(peer_id, Session::new(peer_id, role));
        Ok(())
    }

    /// DHT-capable peers outrank non-DHT-capable peers regardless of
    /// distance; among peers of equal capability rank, the furthest from
    /// local is preferred for eviction. Returns `None` if the incoming peer
    /// should instead be rejected (it is not closer/more useful than the
    /// current furthest peer).
    fn select_eviction_victim(&self, incoming: NodeId) -> Option<NodeId> {
        let worst = self
            .sessions
            .values()
            .max_by(|a, b| {
                let rank_a = (!a.dht_capable, std::cmp::Reverse(self.local_id.distance(&a.peer_id)));
                let rank_b = (!b.dht_capable, std::cmp::Reverse(self.local_id.distance(&b.peer_id)));
                // higher "eviction priority" = less capable, less close
                rank_a.cmp(&rank_b).reverse()
            })?;
        let incoming_closer = self.local_id.distance(&incoming) < self.local_id.distance(&worst.peer_id);
        if !worst.dht_capable && incoming_closer {
            Some(worst.peer_id)
        } else if worst.dht_capable {
            None
        } else {
            None
        }
    }

    /// Mark a session connected and spawn its receive loop: frames arriving
    /// on the data channel are decoded and surfaced as `SessionEvent::Data`
    /// plus (when they parse as a [`Message`]) `SessionEvent::Message`.
    /// Channel closure emits `SessionEvent::Close`.
    pub fn set_connected(&mut self, peer_id: NodeId, channel: Arc<dyn DataChannel>) {
        if let Some(session) = self.sessions.get_mut(&peer_id) {
            session.state = SessionState::Connected;
            session.last_activity_at = Instant::now();
            session.channel = Some(channel.clone());
        }
        let _ = self.events_tx.send(SessionEvent::Connected(peer_id));

        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            loop {
                match channel.recv().await {
                    Some(frame) => {
                        let _ = events_tx.send(SessionEvent::Data(peer_id, frame.clone()));
                        match Message::from_json(&String::from_utf8_lossy(&frame)) {
                            Ok(msg) => {
                                let _ = events_tx.send(SessionEvent::Message(peer_id, Box::new(msg)));
                            }
                            Err(e) => {
                                tracing::debug!(peer = %peer_id, error = %e, "dropping malformed frame");
                            }
                        }
                    }
                    None => {
                        let _ = events_tx.send(SessionEvent::Close(peer_id, "channel closed".into()));
                        break;
                    }
                }
            }
        });
    }

    pub fn mark_dht_capable(&mut self, peer_id: &NodeId) {
        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.dht_capable = true;
        }
    }

    pub fn close(&mut self, peer_id: &NodeId, reason: String) {
        if let Some(mut session) = self.sessions.remove(peer_id) {
            session.state = SessionState::Closed;
            let _ = self.events_tx.send(SessionEvent::Close(*peer_id, reason));
        }
    }

    #[must_use]
    pub fn get(&self, peer_id: &NodeId) -> Option<&Session> {
        self.sessions.get(peer_id)
    }

    #[must_use]
    pub fn is_connected(&self, peer_id: &NodeId) -> bool {
        self.sessions.get(peer_id).is_some_and(Session::is_connected)
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = &NodeId> {
        self.sessions
            .values()
            .filter(|s| s.is_connected())
            .map(|s| &s.peer_id)
    }

    /// Connected peers paired with their observed DHT-capability, for the
    /// signaling router's relay-candidate selection (spec §4.5 step 5).
    #[must_use]
    pub fn connected_with_capability(&self) -> Vec<(NodeId, bool)> {
        self.sessions
            .values()
            .filter(|s| s.is_connected())
            .map(|s| (s.peer_id, s.dht_capable))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Send a message to a connected peer. Fails transiently if the peer is
    /// not connected or the channel rejects the send; callers treat this as
    /// best-effort per spec's transient-error semantics.
    pub async fn send(&self, peer_id: &NodeId, msg: &Message) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get(peer_id)
            .ok_or(SessionError::NoSuchSession(*peer_id))?;
        let channel = session
            .channel
            .clone()
            .ok_or(SessionError::NoSuchSession(*peer_id))?;
        let frame = msg.to_json()?.into_bytes();
        channel.send(frame).await?;
        Ok(())
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    #[test]
    fn initiator_is_lexicographically_smaller_id() {
        let a = id(1);
        let b = id(2);
        assert_eq!(PeerSessionManager::initiator_role(a, b), Role::Initiator);
        assert_eq!(PeerSessionManager::initiator_role(b, a), Role::Responder);
    }

    #[test]
    fn open_without_cap_always_succeeds() {
        let (mut mgr, _rx) = PeerSessionManager::new(id(0), None);
        for i in 1u8..10 {
            mgr.open(id(i)).unwrap();
        }
        assert_eq!(mgr.len(), 9);
    }

    #[test]
    fn open_past_cap_evicts_furthest_non_dht_capable_peer() {
        let local = id(0);
        let (mut mgr, _rx) = PeerSessionManager::new(local, Some(2));
        mgr.open(NodeId::from_bytes([0xff; 20])).unwrap(); // far
        mgr.open(NodeId::from_bytes([0x80; 20])).unwrap(); // mid
        // closer peer should evict the furthest (0xff...) one
        let closer = NodeId::from_bytes([0x01; 20]);
        mgr.open(closer).unwrap();
        assert_eq!(mgr.len(), 2);
        assert!(mgr.get(&closer).is_some());
        assert!(mgr.get(&NodeId::from_bytes([0xff; 20])).is_none());
    }

    #[test]
    fn dht_capable_peers_are_never_evicted_for_distance() {
        let local = id(0);
        let (mut mgr, _rx) = PeerSessionManager::new(local, Some(1));
        let far_capable = NodeId::from_bytes([0xff; 20]);
        mgr.open(far_capable).unwrap();
        mgr.mark_dht_capable(&far_capable);
        let closer = NodeId::from_bytes([0x01; 20]);
        let result = mgr.open(closer);
        assert!(result.is_err());
        assert!(mgr.get(&far_capable).is_some());
    }
}
