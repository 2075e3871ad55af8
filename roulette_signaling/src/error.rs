//! Error types for the signaling server

use thiserror::Error;

/// Errors that can occur during signaling
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Failed to write a frame to a connection
    #[error("Failed to send message: {0}")]
    SendError(String),

    /// The connection was already closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The server is draining and admits no new work
    #[error("Server is shutting down")]
    ShuttingDown,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Errors from the upstream ICE credential API
#[derive(Error, Debug)]
pub enum IceError {
    /// Network or protocol failure talking to the API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),

    /// The body was not the expected JSON document
    #[error("malformed response: {0}")]
    Malformed(String),
}
