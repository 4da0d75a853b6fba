//! `kadmesh`: a Kademlia-style distributed hash table carried over WebRTC
//! data channels, bootstrapped and signaled through a lightweight WebSocket
//! rendezvous server.
//!
//! The crate is organized the way the DHT itself is layered:
//! - [`id`] — 160-bit node identifiers and the XOR distance metric.
//! - [`routing`] — the k-bucket routing table (a splitting binary trie).
//! - [`lookup`] — iterative α-parallel FIND_NODE / FIND_VALUE.
//! - [`storage`] — the local bounded key-value store and its eviction rule.
//! - [`session`] — the WebRTC data-channel session map and its `DataChannel`
//!   transport boundary.
//! - [`signaling`] — routing WebRTC signals between the rendezvous and
//!   multi-hop DHT forwarding.
//! - [`node`] — orchestration: wires the above into one node behind a
//!   single mutual-exclusion boundary, and exposes the public API.
//!
//! Only [`node::DhtNode`], [`config::NodeConfig`], and [`error::NodeError`]
//! are meant for typical consumers; the subsystem modules are public for
//! embedding and testing, matching the teacher crate's own layering.

pub mod config;
pub mod error;
pub mod id;
pub mod lookup;
pub mod messages;
pub mod node;
pub mod routing;
pub mod session;
pub mod signaling;
pub mod storage;

pub use config::NodeConfig;
pub use error::NodeError;
pub use id::NodeId;
pub use node::{DhtNode, NodeEvent};
