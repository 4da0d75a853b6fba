//! Signaling: carries WebRTC offer/answer/ICE messages to peers either via
//! the rendezvous server or, once the overlay is well-connected, via
//! multi-hop DHT forwarding.

mod rendezvous;
mod router;

pub use rendezvous::{RendezvousClient, RendezvousError, RendezvousEvent, ServerMessage};
pub use router::{
    DhtCapability, ForwardAction, PendingSignalState, SignalRoute, SignalingError, SignalingRouter,
    DEFAULT_SIGNAL_TTL, DHT_ROUTE_REFRESH_INTERVAL, DHT_SIGNAL_THRESHOLD, MAX_CONNECTION_RETRIES,
};
