//! Wire types for the roulette signaling protocol
//!
//! Clients hold one WebSocket to the server and exchange JSON records that
//! always carry a `type` field.
//!
//! ## Client → server
//!
//! - `{"type": "pairing-request"}` - ask for a random partner
//! - `{"type": "leave"}` - drop the current partner, keep the connection
//! - `{"type": "offer" | "answer" | "ice-candidate" | "media-status", ...}` -
//!   negotiation payloads, relayed to the partner unmodified
//!
//! ## Server → client
//!
//! - `{"type": "initiate-offer"}` - you waited longer, create the offer
//! - `{"type": "wait-for-offer"}` - your partner will send the offer
//! - `{"type": "partner-left", "reason": "..."}` - your partner is gone
//! - `{"type": "status", "status": "peer-unavailable"}` - nobody to relay to

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Public STUN server handed out when no TURN credentials are available.
pub const PUBLIC_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Reason attached to `partner-left` when the partner's connection goes away.
pub const PARTNER_DISCONNECTED: &str = "Your partner disconnected";

/// Identifier of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PeerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors produced while reading an inbound record
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not a JSON object
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` field is absent or not a string
    #[error("missing message type")]
    MissingType,

    /// The `type` field names no known message
    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

/// Discriminator of an inbound client record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Client is ready to be matched with a partner
    PairingRequest,
    /// Client drops its partner but stays connected
    Leave,
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
    /// Trickled ICE candidate
    IceCandidate,
    /// Camera / microphone toggle notice
    MediaStatus,
}

impl RequestKind {
    /// Every recognized kind, in wire order.
    pub const ALL: [RequestKind; 6] = [
        RequestKind::PairingRequest,
        RequestKind::Leave,
        RequestKind::Offer,
        RequestKind::Answer,
        RequestKind::IceCandidate,
        RequestKind::MediaStatus,
    ];

    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::PairingRequest => "pairing-request",
            RequestKind::Leave => "leave",
            RequestKind::Offer => "offer",
            RequestKind::Answer => "answer",
            RequestKind::IceCandidate => "ice-candidate",
            RequestKind::MediaStatus => "media-status",
        }
    }

    /// Whether records of this kind are opaque payloads for the partner.
    pub fn is_negotiation(self) -> bool {
        matches!(
            self,
            RequestKind::Offer
                | RequestKind::Answer
                | RequestKind::IceCandidate
                | RequestKind::MediaStatus
        )
    }

    /// Read the discriminator of a raw record without consuming the rest of it.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(rename = "type")]
            kind: Option<serde_json::Value>,
        }

        let envelope: Envelope = serde_json::from_str(text)?;
        match envelope.kind {
            Some(serde_json::Value::String(kind)) => kind.parse(),
            _ => Err(ProtocolError::MissingType),
        }
    }
}

impl FromStr for RequestKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pairing-request" | "ready_for_peer" => Ok(RequestKind::PairingRequest),
            "leave" => Ok(RequestKind::Leave),
            "offer" => Ok(RequestKind::Offer),
            "answer" => Ok(RequestKind::Answer),
            "ice-candidate" | "ice" => Ok(RequestKind::IceCandidate),
            "media-status" | "media_status" => Ok(RequestKind::MediaStatus),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status codes carried by a `status` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// A negotiation payload arrived while the sender had no partner
    PeerUnavailable,
}

/// Records emitted by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Receiver waited longer and must create the SDP offer
    InitiateOffer,
    /// Receiver must wait for its partner's offer
    WaitForOffer,
    /// Receiver's partner is gone
    PartnerLeft {
        /// Human-readable explanation
        reason: String,
    },
    /// Informational notice
    Status {
        /// What happened
        status: Status,
    },
}

impl ServerEvent {
    /// `partner-left` with the standard disconnect reason.
    pub fn partner_left() -> Self {
        ServerEvent::PartnerLeft {
            reason: PARTNER_DISCONNECTED.to_string(),
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for ServerEvent {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// `urls` of an ICE server: browsers accept a single url or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    /// One url
    One(String),
    /// Several urls for the same server
    Many(Vec<String>),
}

impl IceUrls {
    /// Whether any of the urls equals `url`.
    pub fn contains(&self, url: &str) -> bool {
        match self {
            IceUrls::One(own) => own == url,
            IceUrls::Many(own) => own.iter().any(|u| u == url),
        }
    }
}

/// One `RTCIceServer` descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// STUN/TURN urls
    pub urls: IceUrls,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Credential-less server with a single url.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }

    /// The public STUN server.
    pub fn public_stun() -> Self {
        Self::stun(PUBLIC_STUN_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_only_the_type_field() {
        let kind = RequestKind::parse(r#"{"type":"offer","offer":{"sdp":"v=0","type":"offer"}}"#)
            .unwrap();
        assert_eq!(kind, RequestKind::Offer);
        assert!(kind.is_negotiation());
    }

    #[test]
    fn parse_accepts_legacy_names() {
        assert_eq!(
            RequestKind::parse(r#"{"type":"ready_for_peer"}"#).unwrap(),
            RequestKind::PairingRequest
        );
        assert_eq!(
            RequestKind::parse(r#"{"type":"ice","candidate":{}}"#).unwrap(),
            RequestKind::IceCandidate
        );
        assert_eq!(
            RequestKind::parse(r#"{"type":"media_status","kind":"video","enabled":false}"#)
                .unwrap(),
            RequestKind::MediaStatus
        );
    }

    #[test]
    fn canonical_names_parse_back() {
        for kind in RequestKind::ALL {
            assert_eq!(kind.as_str().parse::<RequestKind>().unwrap(), kind);
        }
    }

    #[test]
    fn parse_rejects_missing_or_unknown_type() {
        assert!(matches!(
            RequestKind::parse(r#"{"offer":{}}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            RequestKind::parse(r#"{"type":42}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            RequestKind::parse(r#"{"type":"dance"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "dance"
        ));
        assert!(matches!(
            RequestKind::parse("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            RequestKind::parse("42"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn server_events_are_tagged_by_type() {
        assert_eq!(
            ServerEvent::InitiateOffer.to_string(),
            r#"{"type":"initiate-offer"}"#
        );
        assert_eq!(
            ServerEvent::WaitForOffer.to_string(),
            r#"{"type":"wait-for-offer"}"#
        );
        assert_eq!(
            ServerEvent::partner_left().to_string(),
            r#"{"type":"partner-left","reason":"Your partner disconnected"}"#
        );
        assert_eq!(
            ServerEvent::Status {
                status: Status::PeerUnavailable
            }
            .to_string(),
            r#"{"type":"status","status":"peer-unavailable"}"#
        );
    }

    #[test]
    fn ice_server_omits_absent_credentials() {
        let json = serde_json::to_value(IceServer::public_stun()).unwrap();
        assert_eq!(json, serde_json::json!({"urls": PUBLIC_STUN_URL}));

        let turn: IceServer = serde_json::from_value(serde_json::json!({
            "urls": ["turn:global.turn.example:3478?transport=udp"],
            "username": "u",
            "credential": "c"
        }))
        .unwrap();
        assert!(turn.urls.contains("turn:global.turn.example:3478?transport=udp"));
        assert_eq!(turn.username.as_deref(), Some("u"));
    }

    #[test]
    fn peer_id_displays_as_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(PeerId::from(uuid).to_string(), uuid.to_string());
        assert_ne!(PeerId::new(), PeerId::new());
    }
}
