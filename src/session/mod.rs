//! Peer session management: the set of active WebRTC data-channel sessions,
//! keyed by remote node id.

mod manager;
mod transport;

pub use manager::{PeerSessionManager, Session, SessionError, SessionEvent, SessionState};
pub use transport::{DataChannel, DataChannelError};

#[cfg(any(test, feature = "test-util"))]
pub use transport::test_util;
