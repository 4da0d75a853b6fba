//! Iterative α-parallel FIND_NODE / FIND_VALUE lookups.

use crate::id::NodeId;
use crate::messages::{CompactPeer, Message, WireValue};
use crate::routing::{PeerRecord, RoutingTable};
use crate::session::{PeerSessionManager, SessionError};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

pub const ALPHA: usize = 3;
pub const MAX_ITERATIONS: usize = 20;
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// What kind of response a pending request is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKind {
    FindNode,
    FindValue,
}

/// Correlates outbound FIND_NODE/FIND_VALUE requests to their responses.
/// Keyed by `(peer, kind)` since a node issues at most one outstanding
/// request of a given kind to a given peer at a time within one lookup
/// round.
#[derive(Default)]
pub struct PendingReplies {
    entries: Mutex<HashMap<(NodeId, PendingKind), oneshot::Sender<Message>>>,
}

impl PendingReplies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, peer: NodeId, kind: PendingKind) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().unwrap().insert((peer, kind), tx);
        rx
    }

    /// Called by the node's inbound message dispatcher when a response
    /// arrives. Returns true if a waiter was found and fulfilled.
    pub fn fulfill(&self, peer: NodeId, kind: PendingKind, msg: Message) -> bool {
        if let Some(tx) = self.entries.lock().unwrap().remove(&(peer, kind)) {
            let _ = tx.send(msg);
            true
        } else {
            false
        }
    }

    fn cancel(&self, peer: NodeId, kind: PendingKind) {
        self.entries.lock().unwrap().remove(&(peer, kind));
    }
}

/// Result of an iterative FIND_VALUE.
pub enum ValueLookupResult {
    Found(Vec<u8>),
    NotFound(Vec<PeerRecord>),
}

async fn query_peer(
    sessions: &PeerSessionManager,
    pending: &PendingReplies,
    peer: NodeId,
    request: Message,
    kind: PendingKind,
) -> Option<Message> {
    let rx = pending.register(peer, kind);
    if sessions.send(&peer, &request).await.is_err() {
        pending.cancel(peer, kind);
        return None;
    }
    match timeout(RPC_TIMEOUT, rx).await {
        Ok(Ok(msg)) => Some(msg),
        _ => {
            pending.cancel(peer, kind);
            None
        }
    }
}

/// Shared convergence loop for FIND_NODE and FIND_VALUE: seed a shortlist
/// from the routing table, repeatedly query up to α unqueried peers in
/// parallel, merge results, stop on convergence or iteration cap.
#[allow(clippy::too_many_arguments)]
async fn iterative_lookup(
    local_id: NodeId,
    target: NodeId,
    routing: &mut RoutingTable,
    sessions: &PeerSessionManager,
    pending: &PendingReplies,
    want_value: bool,
    k: usize,
    alpha: usize,
) -> (Vec<PeerRecord>, Option<Vec<u8>>) {
    let mut shortlist = routing.closest(&target, k);
    if shortlist.is_empty() {
        return (Vec::new(), None);
    }
    let mut queried: HashSet<NodeId> = HashSet::new();
    let mut closest_seen = shortlist
        .first()
        .map(|p| p.id.distance(&target))
        .unwrap_or(local_id.distance(&target));

    for _ in 0..MAX_ITERATIONS {
        let to_query: Vec<NodeId> = shortlist
            .iter()
            .map(|p| p.id)
            .filter(|id| !queried.contains(id))
            .take(alpha)
            .collect();
        if to_query.is_empty() {
            break;
        }
        for id in &to_query {
            queried.insert(*id);
        }

        let kind = if want_value {
            PendingKind::FindValue
        } else {
            PendingKind::FindNode
        };
        let mut futures = Vec::new();
        for peer in &to_query {
            let request = if want_value {
                Message::FindValue {
                    sender: local_id,
                    key: target,
                }
            } else {
                Message::FindNode {
                    sender: local_id,
                    target,
                }
            };
            futures.push(query_peer(sessions, pending, *peer, request, kind));
        }
        let responses = futures_util::future::join_all(futures).await;

        let mut discovered: Vec<CompactPeer> = Vec::new();
        for response in responses.into_iter().flatten() {
            match response {
                Message::FindNodeResponse { nodes, .. } => discovered.extend(nodes),
                Message::FindValueResponse { value: Some(value), .. } => {
                    let bytes = match value {
                        WireValue::Text(s) => s.into_bytes(),
                        WireValue::Bytes(b) => b,
                    };
                    return (shortlist, Some(bytes));
                }
                Message::FindValueResponse { nodes, .. } => discovered.extend(nodes),
                _ => {}
            }
        }

        let mut changed = false;
        for peer in discovered {
            if peer.id == local_id {
                continue;
            }
            let _ = routing.add(peer.id);
            if !shortlist.iter().any(|p| p.id == peer.id) {
                shortlist.push(PeerRecord {
                    id: peer.id,
                    last_seen: std::time::Instant::now(),
                    connection_quality: None,
                });
                changed = true;
            }
        }
        shortlist.sort_by(|a, b| {
            a.id.distance(&target)
                .cmp(&b.id.distance(&target))
                .then_with(|| a.id.cmp(&b.id))
        });
        shortlist.truncate(k);

        let new_closest = shortlist
            .first()
            .map(|p| p.id.distance(&target))
            .unwrap_or(closest_seen);
        if new_closest < closest_seen {
            closest_seen = new_closest;
        } else if !changed {
            // A full round produced no closer peer.
            let all_queried = shortlist.iter().all(|p| queried.contains(&p.id));
            if all_queried {
                break;
            }
        }

        let all_queried = shortlist.iter().all(|p| queried.contains(&p.id));
        if all_queried {
            break;
        }
    }

    tracing::debug!(
        target = %target,
        want_value,
        queried = queried.len(),
        shortlist = shortlist.len(),
        "lookup round completed"
    );
    (shortlist, None)
}

#[allow(clippy::too_many_arguments)]
pub async fn find_node(
    local_id: NodeId,
    target: NodeId,
    routing: &mut RoutingTable,
    sessions: &PeerSessionManager,
    pending: &PendingReplies,
    k: usize,
    alpha: usize,
) -> Vec<PeerRecord> {
    let (peers, _) =
        iterative_lookup(local_id, target, routing, sessions, pending, false, k, alpha).await;
    peers
}

#[allow(clippy::too_many_arguments)]
pub async fn find_value(
    local_id: NodeId,
    key: NodeId,
    routing: &mut RoutingTable,
    sessions: &PeerSessionManager,
    pending: &PendingReplies,
    k: usize,
    alpha: usize,
) -> ValueLookupResult {
    let (peers, value) =
        iterative_lookup(local_id, key, routing, sessions, pending, true, k, alpha).await;
    match value {
        Some(v) => ValueLookupResult::Found(v),
        None => ValueLookupResult::NotFound(peers),
    }
}

/// Handle an inbound FIND_NODE request: respond with our `k` closest peers to
/// the requested target.
pub fn handle_find_node(
    routing: &RoutingTable,
    local_id: NodeId,
    target: NodeId,
    k: usize,
) -> Message {
    let nodes = routing
        .closest(&target, k)
        .into_iter()
        .map(|p| CompactPeer { id: p.id })
        .collect();
    Message::FindNodeResponse {
        sender: local_id,
        nodes,
    }
}

/// Handle an inbound PING.
pub fn handle_ping(local_id: NodeId) -> Message {
    Message::Pong { sender: local_id }
}

pub type SendResult = Result<(), SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_node_on_empty_routing_table_returns_empty_no_error() {
        let local = NodeId::random();
        let mut routing = RoutingTable::new(local);
        let (sessions, _rx) = PeerSessionManager::new(local, None);
        let pending = PendingReplies::new();
        let result = find_node(
            local,
            NodeId::random(),
            &mut routing,
            &sessions,
            &pending,
            crate::routing::K,
            ALPHA,
        )
        .await;
        assert!(result.is_empty());
    }

    #[test]
    fn handle_find_node_returns_closest_known_peers() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut routing = RoutingTable::new(local);
        for i in 1u8..5 {
            routing.add(NodeId::from_bytes([i; 20])).unwrap();
        }
        let target = NodeId::from_bytes([0u8; 20]);
        let response = handle_find_node(&routing, local, target, crate::routing::K);
        match response {
            Message::FindNodeResponse { nodes, .. } => assert_eq!(nodes.len(), 4),
            _ => panic!("expected FindNodeResponse"),
        }
    }

    #[test]
    fn handle_ping_responds_pong() {
        let local = NodeId::random();
        assert!(matches!(handle_ping(local), Message::Pong { .. }));
    }

    #[test]
    fn alpha_and_iteration_constants_match_spec_defaults() {
        assert_eq!(ALPHA, 3);
        assert_eq!(MAX_ITERATIONS, 20);
        assert_eq!(RPC_TIMEOUT, Duration::from_secs(5));
    }
}
