//! Aggregate error type for the public API surface, assembled the way the
//! teacher's `DiscoveryError` wraps its subsystem errors via `#[from]`.

use crate::id::NodeIdParseError;
use crate::messages::MessageError;
use crate::routing::RoutingError;
use crate::session::SessionError;
use crate::signaling::SignalingError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors surfaced to callers of [`crate::node::DhtNode`]'s public API.
///
/// Per spec §7: `InvalidInput`, `NotReady`, and `Fatal` are surfaced;
/// `Transient`, `PeerLimitReached`, and `SignalValidation` are not — those
/// are swallowed internally or emitted as events, never returned as errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("node is not ready: initialization has not completed")]
    NotReady,
    #[error("routing table error: {0}")]
    Routing(#[from] RoutingError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
    #[error("message codec error: {0}")]
    Message(#[from] MessageError),
    #[error("malformed node id: {0}")]
    NodeId(#[from] NodeIdParseError),
    #[error("fatal initialization failure: {0}")]
    Fatal(String),
}
