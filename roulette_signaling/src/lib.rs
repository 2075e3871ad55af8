//! Random-pairing WebRTC signaling server
//!
//! Clients connect over a WebSocket, ask to be paired with a stranger, and
//! once paired exchange SDP offers/answers and ICE candidates through the
//! server until either side leaves or disconnects.
//!
//! # Protocol
//!
//! All frames are JSON text objects with a `type` field.
//!
//! ## Client → server
//!
//! - `{"type": "pairing-request"}` - join the waiting queue, or pair at once
//! - `{"type": "leave"}` - drop the current partner, keep the connection
//! - `{"type": "offer" | "answer" | "ice-candidate" | "media-status", ...}` -
//!   relayed unchanged to the partner
//!
//! ## Server → client
//!
//! - `{"type": "initiate-offer"}` - you were paired; create the offer
//! - `{"type": "wait-for-offer"}` - you were paired; expect an offer
//! - `{"type": "partner-left", "reason": "..."}` - your partner is gone
//! - `{"type": "status", "status": "peer-unavailable"}` - nothing to relay to
//!
//! # HTTP
//!
//! - **GET /ws** - WebSocket upgrade
//! - **GET /api/active-users** - `{"count": n}`
//! - **GET /api/turn-config** - ICE server list for `RTCPeerConnection`
//! - **GET /health**, **GET /ping** - liveness
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! RUST_LOG=debug roulette-signaling --port 8080
//!
//! # Talk to it
//! websocat ws://127.0.0.1:8080/ws
//! {"type":"pairing-request"}
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod ice;
pub mod matchmaking;
pub mod registry;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::{IceError, SignalingError};
pub use handler::{Routed, handle_message};
pub use ice::IceServerProvider;
pub use server::{AppState, build_router};
pub use state::{EngineOptions, ServerState};
