//! Error types for the ClientQuery connection
//!
//! One enum covers every way a connection attempt can fail.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::codec::Status;

/// Errors raised by the transport, the protocol client and the engine
///
/// Every variant routes the engine to backoff-and-retry; none is
/// permanently fatal.
#[derive(Debug, Error)]
pub enum ClientQueryError {
    /// Could not open the socket (refused or timed out)
    #[error("cannot connect to {addr}: {reason}")]
    ConnectionFailure { addr: String, reason: String },

    /// `auth` answered with a non-zero status
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The voice client is not sitting in any channel
    #[error("voice client is not connected to a server")]
    NotConnected,

    /// Prolonged silence or repeated handler faults
    #[error("stale connection: {0}")]
    StaleConnection(String),

    /// Peer closed the socket
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The voice client reported its own server connection as gone
    #[error("voice client disconnected from its server")]
    Disconnected,

    /// No terminating status record arrived in time
    #[error("no response to '{0}'")]
    ResponseTimeout(String),

    /// A command that had to succeed returned a non-zero status
    #[error("'{command}' failed: {status}")]
    Query { command: String, status: Status },

    /// Malformed record (skipped, never fatal)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// IO error on the socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientQueryError {
    /// Errors after which the socket can no longer be trusted
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientQueryError::ConnectionFailure { .. }
                | ClientQueryError::ConnectionClosed
                | ClientQueryError::Disconnected
                | ClientQueryError::ResponseTimeout(_)
                | ClientQueryError::Io(_)
        )
    }
}

pub type Result<T, E = ClientQueryError> = std::result::Result<T, E>;
