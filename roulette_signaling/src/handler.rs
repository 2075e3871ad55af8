//! Routing of inbound client records
//!
//! Pairing and leave requests drive the matchmaking engine; negotiation
//! payloads are relayed to the sender's partner byte for byte. Anything the
//! router cannot read is logged and dropped, never closing the connection.

use crate::state::ServerState;
use roulette_protocol::{PeerId, ProtocolError, RequestKind, ServerEvent, Status};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the router did with one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Handed to the matchmaking engine
    Engine(RequestKind),
    /// Forwarded to the partner
    Relayed(PeerId),
    /// Partner was gone; its cleanup ran instead
    StalePartner(PeerId),
    /// Sender had no partner
    NoPartner,
    /// Unreadable or unknown record
    Dropped,
    /// Server is shutting down
    Rejected,
}

/// Route one text frame received from `sender`.
pub fn handle_message(state: &ServerState, sender: PeerId, text: &str) -> Routed {
    if state.is_shutting_down() {
        debug!(peer = %sender, "shutting down, dropping message");
        return Routed::Rejected;
    }

    let kind = match RequestKind::parse(text) {
        Ok(kind) => kind,
        Err(ProtocolError::UnknownType(kind)) => {
            warn!(peer = %sender, kind = %kind, "unknown message type");
            return Routed::Dropped;
        }
        Err(e) => {
            warn!(peer = %sender, error = %e, "unreadable message");
            return Routed::Dropped;
        }
    };

    match kind {
        RequestKind::PairingRequest => {
            state.request_pairing(sender);
            Routed::Engine(kind)
        }
        RequestKind::Leave => {
            state.leave(sender);
            Routed::Engine(kind)
        }
        RequestKind::Offer
        | RequestKind::Answer
        | RequestKind::IceCandidate
        | RequestKind::MediaStatus => relay(state, sender, kind, text),
    }
}

fn relay(state: &ServerState, sender: PeerId, kind: RequestKind, text: &str) -> Routed {
    let Some(partner) = state.partner_of(&sender) else {
        debug!(peer = %sender, %kind, "no partner to relay to");
        state.notify(
            sender,
            &ServerEvent::Status {
                status: Status::PeerUnavailable,
            },
        );
        return Routed::NoPartner;
    };

    if !state.is_live(&partner) {
        debug!(peer = %sender, partner = %partner, "partner gone, cleaning up");
        state.disconnect(partner);
        return Routed::StalePartner(partner);
    }

    state.send_text(partner, Arc::from(text));
    Routed::Relayed(partner)
}
