//! Peer-to-peer wire format: JSON text frames exchanged over data channels.
//!
//! Every message carries `type` and `sender`; additional fields vary by
//! type. Message encode/decode never fails on well-formed input: malformed
//! frames are a [`MessageError`], not a panic.

use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("signal message missing required field: {0}")]
    MissingSignalField(&'static str),
}

/// A single relayed node reference, as carried in FIND_NODE_RESPONSE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactPeer {
    pub id: NodeId,
}

/// Kind of an in-flight WebRTC signal carried by SIGNAL messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Ping,
    RouteTest,
}

/// Payload of a SIGNAL message: the WebRTC session description or ICE
/// candidate data being relayed, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: String },
    Ping,
    RouteTest,
}

impl SignalPayload {
    pub fn validate(&self) -> Result<(), MessageError> {
        match self {
            SignalPayload::Offer { sdp } | SignalPayload::Answer { sdp } if sdp.is_empty() => {
                Err(MessageError::MissingSignalField("sdp"))
            }
            SignalPayload::IceCandidate { candidate } if candidate.is_empty() => {
                Err(MessageError::MissingSignalField("candidate"))
            }
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            SignalPayload::Offer { .. } => SignalKind::Offer,
            SignalPayload::Answer { .. } => SignalKind::Answer,
            SignalPayload::IceCandidate { .. } => SignalKind::IceCandidate,
            SignalPayload::Ping => SignalKind::Ping,
            SignalPayload::RouteTest => SignalKind::RouteTest,
        }
    }
}

/// A value as carried in STORE / FIND_VALUE_RESPONSE: either a UTF-8 string
/// or arbitrary bytes, base64-encoded at the wire boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum WireValue {
    Text(String),
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl WireValue {
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            WireValue::Text(s) => s.into_bytes(),
            WireValue::Bytes(b) => b,
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(s) => WireValue::Text(s),
            Err(e) => WireValue::Bytes(e.into_bytes()),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// The full SIGNAL envelope, used both peer-to-peer and via the rendezvous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalEnvelope {
    pub target: NodeId,
    pub original_sender: NodeId,
    pub signal: SignalPayload,
    pub ttl: u8,
    pub via_dht: bool,
    pub signal_path: Vec<NodeId>,
}

/// All message types exchanged between DHT peers over a data channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "PING")]
    Ping { sender: NodeId },
    #[serde(rename = "PONG")]
    Pong { sender: NodeId },
    #[serde(rename = "FIND_NODE")]
    FindNode { sender: NodeId, target: NodeId },
    #[serde(rename = "FIND_NODE_RESPONSE")]
    FindNodeResponse {
        sender: NodeId,
        nodes: Vec<CompactPeer>,
    },
    #[serde(rename = "FIND_VALUE")]
    FindValue { sender: NodeId, key: NodeId },
    #[serde(rename = "FIND_VALUE_RESPONSE")]
    FindValueResponse {
        sender: NodeId,
        key: NodeId,
        value: Option<WireValue>,
        #[serde(default)]
        nodes: Vec<CompactPeer>,
    },
    #[serde(rename = "STORE")]
    Store {
        sender: NodeId,
        key: String,
        value: WireValue,
    },
    #[serde(rename = "STORE_RESPONSE")]
    StoreResponse {
        sender: NodeId,
        success: bool,
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "SIGNAL")]
    Signal {
        sender: NodeId,
        #[serde(flatten)]
        envelope: SignalEnvelope,
    },
}

impl Message {
    #[must_use]
    pub fn sender(&self) -> NodeId {
        match self {
            Message::Ping { sender }
            | Message::Pong { sender }
            | Message::FindNode { sender, .. }
            | Message::FindNodeResponse { sender, .. }
            | Message::FindValue { sender, .. }
            | Message::FindValueResponse { sender, .. }
            | Message::Store { sender, .. }
            | Message::StoreResponse { sender, .. }
            | Message::Signal { sender, .. } => *sender,
        }
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    #[test]
    fn ping_round_trips_through_json() {
        let msg = Message::Ping { sender: id(1) };
        let json = msg.to_json().unwrap();
        let back = Message::from_json(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn find_node_response_round_trips() {
        let msg = Message::FindNodeResponse {
            sender: id(1),
            nodes: vec![CompactPeer { id: id(2) }, CompactPeer { id: id(3) }],
        };
        let json = msg.to_json().unwrap();
        let back = Message::from_json(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn store_value_round_trips_as_text_when_utf8() {
        let msg = Message::Store {
            sender: id(1),
            key: "hello".into(),
            value: WireValue::from_bytes(b"world".to_vec()),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"world\""));
        let back = Message::from_json(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn signal_offer_rejects_empty_sdp() {
        let payload = SignalPayload::Offer { sdp: String::new() };
        assert!(matches!(
            payload.validate(),
            Err(MessageError::MissingSignalField("sdp"))
        ));
    }

    #[test]
    fn signal_ice_candidate_rejects_empty_candidate() {
        let payload = SignalPayload::IceCandidate {
            candidate: String::new(),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn malformed_json_is_decode_error_not_panic() {
        let result = Message::from_json("{not json");
        assert!(matches!(result, Err(MessageError::Decode(_))));
    }

    #[test]
    fn sender_accessor_covers_all_variants() {
        let s = id(9);
        assert_eq!(Message::Ping { sender: s }.sender(), s);
        assert_eq!(Message::Pong { sender: s }.sender(), s);
    }
}
