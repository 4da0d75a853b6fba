//! Routing policy for WebRTC signals: rendezvous vs. DHT multi-hop
//! forwarding, loop prevention, route learning, and per-signal retry.

use crate::id::NodeId;
use crate::messages::{SignalEnvelope, SignalKind};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Hop budget a newly originated SIGNAL starts with.
pub const DEFAULT_SIGNAL_TTL: u8 = 4;
pub const DHT_SIGNAL_THRESHOLD: u32 = 2;
pub const READY_RATE_LIMIT: Duration = Duration::from_secs(5);
pub const DHT_ROUTE_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
pub const MAX_CONNECTION_RETRIES: u32 = 5;
pub const SIGNAL_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);
pub const COOLDOWN_NORMAL: Duration = Duration::from_secs(5 * 60);
pub const COOLDOWN_NEVER_CONNECTED: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signal payload failed validation: {0}")]
    InvalidSignal(#[from] crate::messages::MessageError),
}

/// Where an outbound signal should be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRoute {
    Rendezvous,
    Dht,
}

/// Per-peer DHT-capability observation.
#[derive(Debug, Clone, Default)]
pub struct DhtCapability {
    pub success_count: u32,
    pub last_success: Option<Instant>,
    pub known_via: HashSet<NodeId>,
}

/// Result of running the forwarding algorithm on an inbound SIGNAL.
#[derive(Debug)]
pub enum ForwardAction {
    /// `local_id` was in the path already; dropped silently.
    DroppedLoop,
    /// TTL exhausted with no route; dropped silently.
    DroppedNoRoute,
    /// We are the target: deliver to the local WebRTC stack.
    Deliver(SignalEnvelope),
    /// Forward to one or more relay candidates.
    Forward {
        targets: Vec<NodeId>,
        envelope: SignalEnvelope,
    },
}

/// State machine for one pending outbound signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingSignalState {
    Idle,
    Signaling,
    DhtAttempt,
    ServerFallback,
    Delivered,
    Timeout,
    Error,
}

#[derive(Debug, Clone)]
struct PendingSignal {
    state: PendingSignalState,
    retries: u32,
    last_attempt: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Cooldown {
    until: Instant,
}

/// Owns DHT-readiness, route-learning tables, and the per-signal retry
/// state for one node.
pub struct SignalingRouter {
    local_id: NodeId,
    dht_capable_peers: HashMap<NodeId, DhtCapability>,
    dht_routes: HashMap<NodeId, HashSet<NodeId>>,
    dht_ready: bool,
    last_ready_change: Instant,
    aggressive: bool,
    pending: HashMap<NodeId, PendingSignal>,
    cooldowns: HashMap<NodeId, Cooldown>,
    ever_connected: HashSet<NodeId>,
    last_route_maintenance: Instant,
    signal_threshold: u32,
    route_refresh_interval: Duration,
}

impl SignalingRouter {
    #[must_use]
    pub fn new(local_id: NodeId, aggressive: bool) -> Self {
        Self::with_thresholds(local_id, aggressive, DHT_SIGNAL_THRESHOLD, DHT_ROUTE_REFRESH_INTERVAL)
    }

    #[must_use]
    pub fn with_thresholds(
        local_id: NodeId,
        aggressive: bool,
        signal_threshold: u32,
        route_refresh_interval: Duration,
    ) -> Self {
        Self {
            local_id,
            dht_capable_peers: HashMap::new(),
            dht_routes: HashMap::new(),
            dht_ready: false,
            last_ready_change: Instant::now() - READY_RATE_LIMIT,
            aggressive,
            pending: HashMap::new(),
            cooldowns: HashMap::new(),
            ever_connected: HashSet::new(),
            last_route_maintenance: Instant::now() - route_refresh_interval,
            signal_threshold,
            route_refresh_interval,
        }
    }

    #[must_use]
    pub fn is_dht_ready(&self) -> bool {
        self.dht_ready
    }

    /// Offer/Answer/IceCandidate always go via rendezvous; Ping/RouteTest go
    /// via the DHT once ready.
    #[must_use]
    pub fn route_for(&self, kind: SignalKind) -> SignalRoute {
        match kind {
            SignalKind::Offer | SignalKind::Answer | SignalKind::IceCandidate => {
                SignalRoute::Rendezvous
            }
            SignalKind::Ping | SignalKind::RouteTest => {
                if self.dht_ready {
                    SignalRoute::Dht
                } else {
                    SignalRoute::Rendezvous
                }
            }
        }
    }

    /// Record a successful DHT-routed delivery/response observed from
    /// `peer`, and re-evaluate readiness (rate-limited to one transition
    /// per 5 seconds).
    pub fn record_dht_success(&mut self, peer: NodeId, via: Option<NodeId>) {
        let cap = self.dht_capable_peers.entry(peer).or_default();
        cap.success_count += 1;
        cap.last_success = Some(Instant::now());
        if let Some(via) = via {
            cap.known_via.insert(via);
        }
        self.reevaluate_readiness();
    }

    fn capable_peer_count(&self) -> usize {
        self.dht_capable_peers
            .values()
            .filter(|c| c.success_count >= self.signal_threshold)
            .count()
    }

    fn reevaluate_readiness(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_ready_change) < READY_RATE_LIMIT {
            return;
        }
        let should_be_ready = self.capable_peer_count() >= 2;
        if should_be_ready != self.dht_ready {
            self.dht_ready = should_be_ready;
            self.last_ready_change = now;
            tracing::info!(ready = should_be_ready, "dht readiness transition");
        }
    }

    /// The core FORWARD(msg) algorithm. `hop_sender` is the immediate
    /// previous hop (the message's top-level `sender` field); `connected`
    /// lists currently-connected peers with their DHT-capability flag.
    pub fn forward(
        &mut self,
        mut envelope: SignalEnvelope,
        hop_sender: NodeId,
        connected: &[(NodeId, bool)],
    ) -> ForwardAction {
        if envelope.signal_path.contains(&self.local_id) {
            return ForwardAction::DroppedLoop;
        }
        envelope.signal_path.push(self.local_id);

        if envelope.target == self.local_id {
            if envelope.via_dht {
                self.learn_route(envelope.original_sender, hop_sender);
            }
            return ForwardAction::Deliver(envelope);
        }

        if connected.iter().any(|(id, _)| *id == envelope.target) {
            envelope.ttl = envelope.ttl.saturating_sub(1);
            envelope.via_dht = true;
            return ForwardAction::Forward {
                targets: vec![envelope.target],
                envelope,
            };
        }

        if envelope.ttl == 0 {
            return ForwardAction::DroppedNoRoute;
        }

        let r = if self.aggressive { 3 } else { 2 };
        let excluded: HashSet<NodeId> = envelope
            .signal_path
            .iter()
            .copied()
            .chain([hop_sender, envelope.original_sender, envelope.target, self.local_id])
            .collect();

        let mut candidates: Vec<(NodeId, bool)> = connected
            .iter()
            .copied()
            .filter(|(id, _)| !excluded.contains(id))
            .collect();
        candidates.sort_by(|a, b| {
            let capable_order = b.1.cmp(&a.1); // capable (true) first
            if capable_order != std::cmp::Ordering::Equal {
                return capable_order;
            }
            a.0.distance(&envelope.target).cmp(&b.0.distance(&envelope.target))
        });
        candidates.truncate(r);

        if candidates.is_empty() {
            return ForwardAction::DroppedNoRoute;
        }

        envelope.ttl = envelope.ttl.saturating_sub(1);
        envelope.via_dht = true;
        ForwardAction::Forward {
            targets: candidates.into_iter().map(|(id, _)| id).collect(),
            envelope,
        }
    }

    fn learn_route(&mut self, original_sender: NodeId, last_hop: NodeId) {
        self.dht_routes
            .entry(original_sender)
            .or_default()
            .insert(last_hop);
        self.record_dht_success(original_sender, Some(last_hop));
    }

    #[must_use]
    pub fn known_route_exists(&self, a: NodeId, b: NodeId) -> bool {
        self.dht_routes.get(&a).is_some_and(|s| s.contains(&b))
            || self.dht_routes.get(&b).is_some_and(|s| s.contains(&a))
    }

    /// Whether route maintenance is due; advances the internal clock if so.
    pub fn route_maintenance_due(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_route_maintenance) >= self.route_refresh_interval {
            self.last_route_maintenance = now;
            true
        } else {
            false
        }
    }

    /// Pairs of connected peers with no known route, asymmetric: the peer
    /// with the higher connection count is the probe source.
    #[must_use]
    pub fn pairs_needing_route_test(&self, connected_with_counts: &[(NodeId, usize)]) -> Vec<(NodeId, NodeId)> {
        let mut out = Vec::new();
        for i in 0..connected_with_counts.len() {
            for j in (i + 1)..connected_with_counts.len() {
                let (a, ca) = connected_with_counts[i];
                let (b, cb) = connected_with_counts[j];
                if self.known_route_exists(a, b) {
                    continue;
                }
                if ca >= cb {
                    out.push((a, b));
                } else {
                    out.push((b, a));
                }
            }
        }
        out
    }

    /// Start (or restart) the retry state machine for a pending signal to
    /// `target`.
    pub fn begin_signal(&mut self, target: NodeId) {
        self.pending.insert(
            target,
            PendingSignal {
                state: PendingSignalState::Signaling,
                retries: 0,
                last_attempt: Instant::now(),
            },
        );
    }

    #[must_use]
    pub fn signal_state(&self, target: &NodeId) -> Option<PendingSignalState> {
        self.pending.get(target).map(|p| p.state)
    }

    pub fn mark_delivered(&mut self, target: &NodeId) {
        if let Some(p) = self.pending.get_mut(target) {
            p.state = PendingSignalState::Delivered;
        }
        self.ever_connected.insert(*target);
    }

    /// Called on a per-attempt timeout. Returns the backoff to wait before
    /// the next retry, or `None` if retries are exhausted (the peer is now
    /// in cooldown).
    pub fn on_timeout(&mut self, target: NodeId) -> Option<Duration> {
        let never_connected = !self.ever_connected.contains(&target);
        let entry = self
            .pending
            .entry(target)
            .or_insert_with(|| PendingSignal {
                state: PendingSignalState::Signaling,
                retries: 0,
                last_attempt: Instant::now(),
            });
        entry.retries += 1;
        entry.last_attempt = Instant::now();
        if entry.retries > MAX_CONNECTION_RETRIES {
            entry.state = PendingSignalState::Timeout;
            let cooldown = if never_connected {
                COOLDOWN_NEVER_CONNECTED
            } else {
                COOLDOWN_NORMAL
            };
            self.cooldowns.insert(
                target,
                Cooldown {
                    until: Instant::now() + cooldown,
                },
            );
            return None;
        }
        Some(Self::backoff(entry.retries))
    }

    /// `min(30s, 1s * 2^retries) * (0.7 + 0.6 * rand())`.
    fn backoff(retries: u32) -> Duration {
        let base = Duration::from_secs(1).saturating_mul(1u32.checked_shl(retries).unwrap_or(u32::MAX));
        let capped = base.min(Duration::from_secs(30));
        let jitter = 0.7 + 0.6 * rand::thread_rng().gen::<f64>();
        capped.mul_f64(jitter)
    }

    #[must_use]
    pub fn is_in_cooldown(&self, peer: &NodeId) -> bool {
        self.cooldowns
            .get(peer)
            .is_some_and(|c| Instant::now() < c.until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SignalPayload;

    fn id(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    fn envelope(target: NodeId, original_sender: NodeId, ttl: u8, path: Vec<NodeId>) -> SignalEnvelope {
        SignalEnvelope {
            target,
            original_sender,
            signal: SignalPayload::Ping,
            ttl,
            via_dht: false,
            signal_path: path,
        }
    }

    #[test]
    fn offer_answer_ice_always_route_via_rendezvous() {
        let router = SignalingRouter::new(id(0), false);
        assert_eq!(router.route_for(SignalKind::Offer), SignalRoute::Rendezvous);
        assert_eq!(router.route_for(SignalKind::Answer), SignalRoute::Rendezvous);
        assert_eq!(
            router.route_for(SignalKind::IceCandidate),
            SignalRoute::Rendezvous
        );
    }

    #[test]
    fn control_signals_use_dht_once_ready() {
        let mut router = SignalingRouter::new(id(0), false);
        assert_eq!(router.route_for(SignalKind::Ping), SignalRoute::Rendezvous);
        router.dht_ready = true;
        assert_eq!(router.route_for(SignalKind::Ping), SignalRoute::Dht);
    }

    #[test]
    fn forward_drops_message_already_in_path() {
        let local = id(1);
        let mut router = SignalingRouter::new(local, false);
        let env = envelope(id(9), id(2), 3, vec![id(1)]);
        let action = router.forward(env, id(2), &[]);
        assert!(matches!(action, ForwardAction::DroppedLoop));
    }

    #[test]
    fn forward_delivers_when_target_is_local() {
        let local = id(1);
        let mut router = SignalingRouter::new(local, false);
        let env = envelope(local, id(2), 3, vec![]);
        let action = router.forward(env, id(2), &[]);
        assert!(matches!(action, ForwardAction::Deliver(_)));
    }

    #[test]
    fn forward_decrements_ttl_and_sets_via_dht_when_relaying() {
        let local = id(1);
        let mut router = SignalingRouter::new(local, false);
        let target = id(5);
        let connected = vec![(id(2), false), (id(3), false)];
        let env = envelope(target, id(9), 3, vec![]);
        match router.forward(env, id(2), &connected) {
            ForwardAction::Forward { envelope, .. } => {
                assert_eq!(envelope.ttl, 2);
                assert!(envelope.via_dht);
            }
            other => panic!("expected Forward, got {other:?}"),
        }
    }

    #[test]
    fn forward_drops_on_zero_ttl_with_no_direct_route() {
        let local = id(1);
        let mut router = SignalingRouter::new(local, false);
        let env = envelope(id(5), id(9), 0, vec![]);
        let action = router.forward(env, id(2), &[(id(3), false)]);
        assert!(matches!(action, ForwardAction::DroppedNoRoute));
    }

    #[test]
    fn readiness_requires_two_capable_peers_and_is_rate_limited() {
        let mut router = SignalingRouter::new(id(0), false);
        router.last_ready_change = Instant::now() - READY_RATE_LIMIT - Duration::from_millis(1);
        router.record_dht_success(id(1), None);
        router.record_dht_success(id(1), None);
        assert!(!router.is_dht_ready(), "only one distinct capable peer so far");
        router.last_ready_change = Instant::now() - READY_RATE_LIMIT - Duration::from_millis(1);
        router.record_dht_success(id(2), None);
        router.record_dht_success(id(2), None);
        assert!(router.is_dht_ready());
    }

    #[test]
    fn backoff_is_capped_at_30_seconds() {
        let d = SignalingRouter::backoff(10);
        assert!(d <= Duration::from_secs(30));
    }

    #[test]
    fn on_timeout_enters_cooldown_after_max_retries() {
        let mut router = SignalingRouter::new(id(0), false);
        router.begin_signal(id(9));
        for _ in 0..MAX_CONNECTION_RETRIES {
            assert!(router.on_timeout(id(9)).is_some());
        }
        assert!(router.on_timeout(id(9)).is_none());
        assert!(router.is_in_cooldown(&id(9)));
    }
}
