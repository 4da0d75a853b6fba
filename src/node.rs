//! Node orchestration: wires the routing table, lookup engine, storage
//! engine, session manager, and signaling router together behind one
//! `tokio::sync::Mutex` boundary, per spec §5 ("implementations on a
//! multi-threaded runtime must wrap node state under a single mutual
//! exclusion boundary"). This mirrors the teacher's `DiscoveryManager`,
//! which holds its DHT/relay/NAT state behind `Arc<RwLock<_>>` and exposes
//! `new`/`start`/`state`/`shutdown`.

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::id::NodeId;
use crate::lookup::{self, PendingKind, PendingReplies, ValueLookupResult};
use crate::messages::{CompactPeer, Message, SignalEnvelope, SignalPayload, WireValue};
use crate::routing::RoutingTable;
use crate::session::{DataChannel, PeerSessionManager, SessionEvent};
use crate::signaling::{
    ForwardAction, RendezvousClient, RendezvousEvent, SignalRoute, SignalingRouter,
    DEFAULT_SIGNAL_TTL,
};
use crate::storage::Storage;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;

/// Events surfaced to the host application. The set is closed, per spec
/// §6.3.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Ready(NodeId),
    PeerConnect(NodeId),
    PeerDisconnect(NodeId, String),
    PeerError(NodeId, String),
    PeerLimitReached(NodeId),
    Signal {
        id: NodeId,
        signal: SignalPayload,
        via_dht: bool,
    },
}

struct NodeState {
    local_id: NodeId,
    config: NodeConfig,
    routing: RoutingTable,
    storage: Storage,
    sessions: PeerSessionManager,
    pending: PendingReplies,
    signaling: SignalingRouter,
    rendezvous: Option<Arc<RendezvousClient>>,
    pending_pings: std::collections::HashMap<NodeId, std::time::Instant>,
}

/// A running DHT node: routing table + lookup engine + storage +
/// signaling router + session manager, all behind one lock.
pub struct DhtNode {
    local_id: NodeId,
    state: Arc<Mutex<NodeState>>,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    ready: watch::Receiver<bool>,
}

impl DhtNode {
    /// Construct a node and start its background dispatch/maintenance
    /// tasks. Returns the node handle plus the event stream described in
    /// spec §6.3.
    pub async fn new(
        local_id: NodeId,
        config: NodeConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<NodeEvent>), NodeError> {
        let (sessions, session_rx) = PeerSessionManager::new(local_id, config.max_peers);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);

        let mut rendezvous = None;
        let mut rendezvous_rx = None;
        for url in &config.bootstrap_addresses {
            match RendezvousClient::connect(url, local_id).await {
                Ok((client, rx)) => {
                    tracing::info!(url, "connected to rendezvous");
                    rendezvous = Some(Arc::new(client));
                    rendezvous_rx = Some(rx);
                    break;
                }
                Err(e) => {
                    tracing::warn!(url, error = %e, "rendezvous bootstrap attempt failed");
                }
            }
        }

        let state = Arc::new(Mutex::new(NodeState {
            local_id,
            signaling: SignalingRouter::with_thresholds(
                local_id,
                config.aggressive_relay,
                config.dht_signal_threshold,
                config.dht_route_refresh_interval,
            ),
            storage: Storage::new(config.max_store_size, config.max_key_size, config.max_value_size),
            routing: RoutingTable::with_k(local_id, config.k),
            sessions,
            pending: PendingReplies::new(),
            rendezvous: rendezvous.clone(),
            pending_pings: std::collections::HashMap::new(),
            config,
        }));

        if let Some(client) = &rendezvous {
            client.register().await.map_err(|e| NodeError::Fatal(e.to_string()))?;
        } else {
            // No bootstrap addresses configured: this node is the seed of
            // its own overlay and is ready immediately.
            let _ = ready_tx.send(true);
            let _ = events_tx.send(NodeEvent::Ready(local_id));
        }

        spawn_dispatch_loop(state.clone(), events_tx.clone(), session_rx, rendezvous_rx, ready_tx);
        spawn_maintenance_loop(state.clone(), events_tx.clone());

        Ok((
            Self {
                local_id,
                state,
                events_tx,
                ready: ready_rx,
            },
            events_rx,
        ))
    }

    /// Resolve once the node has completed initialization (rendezvous
    /// registration, or immediately for a seed node with no bootstrap
    /// addresses).
    pub async fn ready(&self) -> NodeId {
        let mut rx = self.ready.clone();
        if !*rx.borrow() {
            let _ = rx.changed().await;
        }
        self.local_id
    }

    /// Register a one-shot callback for node readiness, mirroring the
    /// reference API's `on_ready(fn(node_id))`.
    pub fn on_ready<F>(&self, f: F)
    where
        F: FnOnce(NodeId) + Send + 'static,
    {
        let mut rx = self.ready.clone();
        let id = self.local_id;
        tokio::spawn(async move {
            if !*rx.borrow() {
                let _ = rx.changed().await;
            }
            f(id);
        });
    }

    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Begin tracking a session for `peer_id`. The caller's own WebRTC stack
    /// drives the actual offer/answer/ICE exchange via [`Self::send_signal`]
    /// and [`Self::signal`]; once a data channel is open, wire it in with
    /// [`Self::attach_channel`].
    pub async fn connect(&self, peer_id: NodeId) -> Result<(), NodeError> {
        let mut state = self.state.lock().await;
        state.sessions.open(peer_id).map_err(NodeError::from)
    }

    /// Hand the node a live data channel for a peer whose session has
    /// already been opened (via [`Self::connect`] or as a responder).
    pub async fn attach_channel(
        &self,
        peer_id: NodeId,
        channel: Arc<dyn DataChannel>,
    ) -> Result<(), NodeError> {
        let mut state = self.state.lock().await;
        state.sessions.set_connected(peer_id, channel);
        let _ = state.routing.add(peer_id);
        new_peer_replication(&mut state, peer_id).await;
        Ok(())
    }

    /// Handle an inbound signal from any source: the rendezvous, a DHT
    /// forward, or the host's own WebRTC stack reporting a freshly minted
    /// offer/answer/candidate destined for `envelope.target`.
    pub async fn signal(&self, envelope: SignalEnvelope) -> Result<(), NodeError> {
        envelope.signal.validate()?;
        let mut state = self.state.lock().await;
        let local_id = state.local_id;
        let connected = state.sessions.connected_with_capability();
        let action = state.signaling.forward(envelope, local_id, &connected);
        drop(state);
        self.apply_forward_action(action).await
    }

    /// Originate an outbound signal toward `target`: chooses rendezvous vs.
    /// DHT routing per spec §4.5 policy and dispatches it.
    pub async fn send_signal(&self, target: NodeId, signal: SignalPayload) -> Result<(), NodeError> {
        signal.validate()?;
        let mut state = self.state.lock().await;
        let local_id = state.local_id;
        let route = state.signaling.route_for(signal.kind());
        tracing::debug!(peer = %target, kind = ?signal.kind(), ?route, "signal routing decision");
        state.signaling.begin_signal(target);

        match route {
            SignalRoute::Rendezvous => {
                if let Some(client) = state.rendezvous.clone() {
                    drop(state);
                    client
                        .send_signal(target, signal)
                        .await
                        .map_err(|e| NodeError::InvalidInput(e.to_string()))?;
                    Ok(())
                } else {
                    Err(NodeError::NotReady)
                }
            }
            SignalRoute::Dht => {
                let envelope = SignalEnvelope {
                    target,
                    original_sender: local_id,
                    signal,
                    ttl: DEFAULT_SIGNAL_TTL,
                    via_dht: false,
                    signal_path: Vec::new(),
                };
                let connected = state.sessions.connected_with_capability();
                let action = state.signaling.forward(envelope, local_id, &connected);
                drop(state);
                self.apply_forward_action(action).await
            }
        }
    }

    async fn apply_forward_action(&self, action: ForwardAction) -> Result<(), NodeError> {
        match action {
            ForwardAction::DroppedLoop | ForwardAction::DroppedNoRoute => Ok(()),
            ForwardAction::Deliver(envelope) => {
                let _ = self.events_tx.send(NodeEvent::Signal {
                    id: envelope.original_sender,
                    signal: envelope.signal,
                    via_dht: envelope.via_dht,
                });
                Ok(())
            }
            ForwardAction::Forward { targets, envelope } => {
                let state = self.state.lock().await;
                let local_id = state.local_id;
                for target in targets {
                    let msg = Message::Signal {
                        sender: local_id,
                        envelope: envelope.clone(),
                    };
                    // Best-effort per spec §4.5 ("all forwarding is
                    // best-effort; errors are logged, never surfaced").
                    if let Err(e) = state.sessions.send(&target, &msg).await {
                        tracing::debug!(peer = %target, error = %e, "signal relay send failed");
                    }
                }
                Ok(())
            }
        }
    }

    /// `put(key, value)`: validate, store locally, then best-effort
    /// replicate to the K closest peers (spec §4.4).
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<bool, NodeError> {
        let key_hash = NodeId::from_bytes_hashed(key.as_bytes());
        let mut state = self.state.lock().await;
        state.storage.validate_put(key, &value)?;
        state.storage.put(key_hash, value.clone(), true, Some(key.to_string()));
        let local_id = state.local_id;
        let (k, alpha) = (state.config.k, state.config.alpha);

        let nodes = {
            let NodeState { routing, sessions, pending, .. } = &mut *state;
            lookup::find_node(local_id, key_hash, routing, sessions, pending, k, alpha).await
        };
        for peer in &nodes {
            if peer.id == local_id {
                continue;
            }
            let msg = Message::Store {
                sender: local_id,
                key: key.to_string(),
                value: WireValue::from_bytes(value.clone()),
            };
            if state.sessions.send(&peer.id, &msg).await.is_ok() {
                state.storage.record_replicated(&key_hash, peer.id);
            }
        }
        Ok(true)
    }

    /// `get(key)`: local hit short-circuits; otherwise FIND_VALUE and cache
    /// any discovered value (spec §4.4).
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let key_hash = NodeId::from_bytes_hashed(key.as_bytes());
        let mut state = self.state.lock().await;
        if let Some(entry) = state.storage.get(&key_hash) {
            return Some(entry.value.clone());
        }
        let local_id = state.local_id;
        let (k, alpha) = (state.config.k, state.config.alpha);
        let result = {
            let NodeState { routing, sessions, pending, .. } = &mut *state;
            lookup::find_value(local_id, key_hash, routing, sessions, pending, k, alpha).await
        };
        match result {
            ValueLookupResult::Found(value) => {
                state.storage.put(key_hash, value.clone(), false, None);
                Some(value)
            }
            ValueLookupResult::NotFound(_) => None,
        }
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let peers: Vec<NodeId> = state.sessions.connected_peers().copied().collect();
        for peer in peers {
            state.sessions.close(&peer, "node closing".into());
        }
    }
}

async fn new_peer_replication(state: &mut NodeState, peer_id: NodeId) {
    let keys: Vec<NodeId> = state.storage.keys().copied().collect();
    let local_id = state.local_id;
    for key_hash in keys {
        let closest = state.routing.closest(&key_hash, state.config.k);
        if !closest.iter().any(|p| p.id == peer_id) {
            continue;
        }
        let Some(entry) = state.storage.get(&key_hash) else { continue };
        let key_field = entry.original_key.clone().unwrap_or_else(|| key_hash.to_hex());
        let msg = Message::Store {
            sender: local_id,
            key: key_field,
            value: WireValue::from_bytes(entry.value.clone()),
        };
        if state.sessions.send(&peer_id, &msg).await.is_ok() {
            state.storage.record_replicated(&key_hash, peer_id);
        }
    }
}

/// Handle one decoded peer-to-peer message, responding or fulfilling
/// pending lookups as appropriate.
async fn handle_peer_message(state: &Arc<Mutex<NodeState>>, events_tx: &mpsc::UnboundedSender<NodeEvent>, from: NodeId, msg: Message) {
    match msg {
        Message::Ping { .. } => {
            let st = state.lock().await;
            let local_id = st.local_id;
            let reply = lookup::handle_ping(local_id);
            let _ = st.sessions.send(&from, &reply).await;
        }
        Message::Pong { .. } => {
            let mut st = state.lock().await;
            if let Some(sent_at) = st.pending_pings.remove(&from) {
                let rtt = sent_at.elapsed();
                let quality = (1.0 - (rtt.as_secs_f32() / 5.0)).clamp(0.0, 1.0);
                st.routing.update_quality(&from, quality);
            }
        }
        Message::FindNode { target, .. } => {
            let st = state.lock().await;
            let local_id = st.local_id;
            let reply = lookup::handle_find_node(&st.routing, local_id, target, st.config.k);
            let _ = st.sessions.send(&from, &reply).await;
        }
        Message::FindNodeResponse { .. } => {
            let st = state.lock().await;
            st.pending.fulfill(from, PendingKind::FindNode, msg);
        }
        Message::FindValue { key, .. } => {
            let st = state.lock().await;
            let local_id = st.local_id;
            let reply = match st.storage.get(&key) {
                Some(entry) => Message::FindValueResponse {
                    sender: local_id,
                    key,
                    value: Some(WireValue::from_bytes(entry.value.clone())),
                    nodes: Vec::new(),
                },
                None => {
                    let nodes = st
                        .routing
                        .closest(&key, st.config.k)
                        .into_iter()
                        .map(|p| CompactPeer { id: p.id })
                        .collect();
                    Message::FindValueResponse {
                        sender: local_id,
                        key,
                        value: None,
                        nodes,
                    }
                }
            };
            let _ = st.sessions.send(&from, &reply).await;
        }
        Message::FindValueResponse { .. } => {
            let st = state.lock().await;
            st.pending.fulfill(from, PendingKind::FindValue, msg);
        }
        Message::Store { key, value, .. } => {
            let mut st = state.lock().await;
            let local_id = st.local_id;
            let value_bytes = value.clone().into_bytes();
            let inbound_str = match &value {
                WireValue::Text(s) => s.clone(),
                WireValue::Bytes(_) => String::new(),
            };
            let (success, error) = match crate::storage::Storage::validate_inbound(&key, &inbound_str) {
                Ok(()) => {
                    let key_hash = if key.len() == 40 {
                        NodeId::from_hex(&key).unwrap_or_else(|_| NodeId::from_bytes_hashed(key.as_bytes()))
                    } else {
                        NodeId::from_bytes_hashed(key.as_bytes())
                    };
                    st.storage.put(key_hash, value_bytes, false, None);
                    (true, None)
                }
                Err(e) => (false, Some(e.to_string())),
            };
            let reply = Message::StoreResponse {
                sender: local_id,
                success,
                key: key.clone(),
                error,
            };
            let _ = st.sessions.send(&from, &reply).await;
        }
        Message::StoreResponse { .. } => {
            // Best-effort: callers that want STORE acks observe them via
            // `replicated_to` bookkeeping done at send time; no pending-
            // reply wait is registered for STORE per spec §4.4 step 5.
        }
        Message::Signal { envelope, .. } => {
            if let Err(e) = envelope.signal.validate() {
                tracing::debug!(peer = %from, error = %e, "dropping invalid inbound signal");
                return;
            }
            let mut st = state.lock().await;
            let local_id = st.local_id;
            // The peer that handed us this SIGNAL over an open data channel
            // has just demonstrated it participates in DHT signal routing.
            st.sessions.mark_dht_capable(&from);
            let connected = st.sessions.connected_with_capability();
            let action = st.signaling.forward(envelope, from, &connected);
            drop(st);
            match action {
                ForwardAction::Deliver(envelope) => {
                    let _ = events_tx.send(NodeEvent::Signal {
                        id: envelope.original_sender,
                        signal: envelope.signal,
                        via_dht: envelope.via_dht,
                    });
                }
                ForwardAction::Forward { targets, envelope } => {
                    let st = state.lock().await;
                    for target in targets {
                        let fwd = Message::Signal {
                            sender: local_id,
                            envelope: envelope.clone(),
                        };
                        let _ = st.sessions.send(&target, &fwd).await;
                    }
                }
                ForwardAction::DroppedLoop | ForwardAction::DroppedNoRoute => {}
            }
        }
    }
}

fn spawn_dispatch_loop(
    state: Arc<Mutex<NodeState>>,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    rendezvous_rx: Option<mpsc::UnboundedReceiver<RendezvousEvent>>,
    ready_tx: watch::Sender<bool>,
) {
    tokio::spawn(async move {
        let mut rendezvous_rx = rendezvous_rx;
        loop {
            tokio::select! {
                Some(event) = session_rx.recv() => {
                    match event {
                        SessionEvent::Connected(peer) => {
                            tracing::info!(peer = %peer, "session connected");
                            let _ = events_tx.send(NodeEvent::PeerConnect(peer));
                            let mut st = state.lock().await;
                            let ping = Message::Ping { sender: st.local_id };
                            st.pending_pings.insert(peer, std::time::Instant::now());
                            let _ = st.sessions.send(&peer, &ping).await;
                        }
                        SessionEvent::Message(peer, msg) => {
                            handle_peer_message(&state, &events_tx, peer, *msg).await;
                        }
                        SessionEvent::Close(peer, reason) => {
                            tracing::info!(peer = %peer, %reason, "session closed");
                            let _ = events_tx.send(NodeEvent::PeerDisconnect(peer, reason));
                        }
                        SessionEvent::Error(peer, reason) => {
                            let _ = events_tx.send(NodeEvent::PeerError(peer, reason));
                        }
                        SessionEvent::PeerLimitReached(peer) => {
                            let _ = events_tx.send(NodeEvent::PeerLimitReached(peer));
                        }
                        SessionEvent::Data(..) => {}
                    }
                }
                Some(event) = async {
                    match &mut rendezvous_rx {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match event {
                        RendezvousEvent::Registered => {
                            let _ = ready_tx.send(true);
                            let local_id = state.lock().await.local_id;
                            let _ = events_tx.send(NodeEvent::Ready(local_id));
                        }
                        RendezvousEvent::PeerList(_peers) => {
                            // Roster updates are informational; the host
                            // decides which peers to dial via `connect`.
                        }
                        RendezvousEvent::Signal { from, signal } => {
                            if let Err(e) = signal.validate() {
                                tracing::debug!(peer = %from, error = %e, "dropping invalid rendezvous signal");
                                continue;
                            }
                            let _ = events_tx.send(NodeEvent::Signal { id: from, signal, via_dht: false });
                        }
                        RendezvousEvent::Closed => {
                            tracing::warn!("rendezvous connection closed");
                        }
                    }
                }
                else => break,
            }
        }
    });
}

fn spawn_maintenance_loop(state: Arc<Mutex<NodeState>>, _events_tx: mpsc::UnboundedSender<NodeEvent>) {
    tokio::spawn(async move {
        let (replicate_interval, republish_interval) = {
            let st = state.lock().await;
            (st.config.replicate_interval, st.config.republish_interval)
        };
        let mut replicate_tick = tokio::time::interval(replicate_interval);
        replicate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut republish_tick = tokio::time::interval(republish_interval);
        republish_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut route_tick = tokio::time::interval(crate::signaling::DHT_ROUTE_REFRESH_INTERVAL);
        route_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = replicate_tick.tick() => replication_sweep(&state).await,
                _ = republish_tick.tick() => republish_sweep(&state).await,
                _ = route_tick.tick() => route_maintenance_sweep(&state).await,
            }
        }
    });
}

/// Replicate every stored entry to its K closest peers (spec §4.4,
/// "Replication (short period)").
async fn replication_sweep(state: &Arc<Mutex<NodeState>>) {
    let keys: Vec<NodeId> = state.lock().await.storage.keys().copied().collect();
    for key_hash in keys {
        replicate_one(state, key_hash).await;
    }
}

/// Republish local-origin entries older than `republish_interval` (spec
/// §4.4, "Republication (long period)").
async fn republish_sweep(state: &Arc<Mutex<NodeState>>) {
    let due = {
        let st = state.lock().await;
        st.storage.local_entries_older_than(st.config.republish_interval)
    };
    for key_hash in due {
        replicate_one(state, key_hash).await;
    }
}

async fn replicate_one(state: &Arc<Mutex<NodeState>>, key_hash: NodeId) {
    let local_id = state.lock().await.local_id;
    let (value, original_key) = {
        let st = state.lock().await;
        match st.storage.get(&key_hash) {
            Some(entry) => (entry.value.clone(), entry.original_key.clone()),
            None => return,
        }
    };
    let nodes = {
        let mut st = state.lock().await;
        let (k, alpha) = (st.config.k, st.config.alpha);
        let NodeState { routing, sessions, pending, .. } = &mut *st;
        lookup::find_node(local_id, key_hash, routing, sessions, pending, k, alpha).await
    };
    let key_field = original_key.unwrap_or_else(|| key_hash.to_hex());
    for peer in nodes {
        if peer.id == local_id {
            continue;
        }
        let mut st = state.lock().await;
        if !st.sessions.is_connected(&peer.id) {
            continue;
        }
        let msg = Message::Store {
            sender: local_id,
            key: key_field.clone(),
            value: WireValue::from_bytes(value.clone()),
        };
        if st.sessions.send(&peer.id, &msg).await.is_ok() {
            st.storage.record_replicated(&key_hash, peer.id);
        }
    }
}

/// Opportunistic route-test probing (spec §4.5, "Periodic route
/// maintenance"). The reference design specifies probing between pairs of
/// *other* connected peers observed by a third party; a single node only
/// has direct visibility into its own sessions, so this implementation
/// probes routes from itself toward routing-table peers it knows about but
/// isn't directly connected to and has no learned DHT route for yet — the
/// same "discover a route before we need it" goal, scoped to what one node
/// can actually observe.
async fn route_maintenance_sweep(state: &Arc<Mutex<NodeState>>) {
    let due = {
        let mut st = state.lock().await;
        st.signaling.route_maintenance_due()
    };
    if !due {
        return;
    }
    let (local_id, candidates) = {
        let st = state.lock().await;
        let candidates: Vec<NodeId> = st
            .routing
            .closest(&st.local_id, st.config.k)
            .into_iter()
            .map(|p| p.id)
            .filter(|id| !st.sessions.is_connected(id))
            .collect();
        (st.local_id, candidates)
    };
    for target in candidates {
        let has_route = state.lock().await.signaling.known_route_exists(local_id, target);
        if has_route {
            continue;
        }
        let mut st = state.lock().await;
        let connected = st.sessions.connected_with_capability();
        if connected.is_empty() {
            continue;
        }
        let envelope = SignalEnvelope {
            target,
            original_sender: local_id,
            signal: SignalPayload::RouteTest,
            ttl: DEFAULT_SIGNAL_TTL,
            via_dht: true,
            signal_path: Vec::new(),
        };
        let action = st.signaling.forward(envelope, local_id, &connected);
        drop(st);
        if let ForwardAction::Forward { targets, envelope } = action {
            let st = state.lock().await;
            for relay in targets {
                let msg = Message::Signal { sender: local_id, envelope: envelope.clone() };
                let _ = st.sessions.send(&relay, &msg).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_util::InMemoryChannel;

    async fn new_node() -> (DhtNode, mpsc::UnboundedReceiver<NodeEvent>, NodeId) {
        let id = NodeId::random();
        let (node, rx) = DhtNode::new(id, NodeConfig::new()).await.unwrap();
        (node, rx, id)
    }

    #[tokio::test]
    async fn seed_node_becomes_ready_immediately() {
        let (node, mut rx, id) = new_node().await;
        let ready_id = node.ready().await;
        assert_eq!(ready_id, id);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, NodeEvent::Ready(got) if got == id));
    }

    #[tokio::test]
    async fn put_then_get_on_single_node_round_trips() {
        let (node, _rx, _id) = new_node().await;
        node.ready().await;
        assert!(node.put("hello", b"world".to_vec()).await.unwrap());
        let got = node.get("hello").await;
        assert_eq!(got, Some(b"world".to_vec()));
    }

    #[tokio::test]
    async fn two_node_put_get_via_attached_channels() {
        // Scenario S1: two nodes connected over an in-memory duplex data
        // channel; A puts, B gets.
        let (node_a, _rx_a, id_a) = new_node().await;
        let (node_b, _rx_b, id_b) = new_node().await;
        node_a.ready().await;
        node_b.ready().await;

        node_a.connect(id_b).await.unwrap();
        node_b.connect(id_a).await.unwrap();
        let (chan_a, chan_b) = InMemoryChannel::pair();
        node_a.attach_channel(id_b, Arc::new(chan_a)).await.unwrap();
        node_b.attach_channel(id_a, Arc::new(chan_b)).await.unwrap();

        // Let the PING/PONG exchange settle.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(node_a.put("hello", b"world".to_vec()).await.unwrap());
        let got = node_b.get("hello").await;
        assert_eq!(got, Some(b"world".to_vec()));
    }
}
