//! # Error Types
//!
//! Error handling for the parallel session protocol.
//!
//! Every failure that can surface from the codec, a connection, the session
//! state machine or the rendezvous server is a variant of [`ProtocolError`].
//!
//! ## Error Categories
//! - **Protocol errors**: malformed frames (unknown tag, over-length content,
//!   garbled control payloads). Fatal to the connection.
//! - **Transport errors**: socket failures, timeouts, closed streams. Fatal to
//!   the connection.
//! - **State conflicts**: a control message or local call that is illegal in the
//!   current [`Status`](crate::protocol::status::Status). Recovered locally by
//!   discarding and logging.
//! - **Configuration errors**: invalid or unreadable configuration.
//!
//! Incomplete frames are not errors; the codec reports them as `Ok(None)`.
//!
//! ## Example Usage
//! ```rust
//! use parallel_protocol::error::{ProtocolError, Result};
//! use parallel_protocol::core::message::Message;
//! use tracing::{error, info};
//!
//! fn parse(frame: &[u8]) -> Result<Message> {
//!     Message::from_bytes(frame)?.ok_or(ProtocolError::ConnectionClosed)
//! }
//!
//! match parse(&[0, 0, 0, 0, 0, 0, 0, 0]) {
//!     Ok(msg) => info!(kind = ?msg.message_type, "parsed"),
//!     Err(e) => error!(error = %e, fatal = e.is_fatal(), "rejected"),
//! }
//! ```

use crate::protocol::status::Status;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on data channel";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on data channel";

    /// Server errors
    pub const ERR_OUTBOUND_QUEUE_FULL: &str = "Outbound queue full, dropping peer";

    /// Control payload errors
    pub const ERR_TRUNCATED_PAYLOAD: &str = "Control payload is truncated";
    pub const ERR_TRAILING_BYTES: &str = "Control payload has trailing bytes";
    pub const ERR_NAME_TOO_LONG: &str = "Peer name exceeds the maximum length";
    pub const ERR_NAME_NOT_UTF8: &str = "Peer name is not valid UTF-8";
    pub const ERR_NAME_EMPTY: &str = "Peer name is empty";
    pub const ERR_UNKNOWN_STATUS: &str = "Unknown status value";
    pub const ERR_UNKNOWN_RESULT: &str = "Unknown result value";

    /// State machine errors
    pub const ERR_NOT_CONNECTED: &str = "Not connected to a session";
    pub const ERR_NOT_HOST: &str = "Only the host can resign hostship";
    pub const ERR_NOT_AUTHENTICATED: &str = "Hostship can only be requested by an authenticated client";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unknown message type tag: {0}")]
    UnknownMessageType(u32),

    #[error("Unknown data message type tag: {0}")]
    UnknownDataMessageType(u32),

    #[error("Message too large: {0} bytes")]
    OversizedMessage(usize),

    #[error("Malformed payload: {0}")]
    MalformedPayload(&'static str),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Authentication rejected by the server")]
    AuthenticationRejected,

    #[error("State conflict in {status:?}: {reason}")]
    StateConflict {
        status: Status,
        reason: &'static str,
    },

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error must tear down the connection it occurred on.
    ///
    /// State conflicts and dispatch misses are recovered locally; everything
    /// touching the byte stream or its framing is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::StateConflict { .. }
                | ProtocolError::UnexpectedMessage
                | ProtocolError::ConfigError(_)
                | ProtocolError::Custom(_)
        )
    }

    /// Whether this error came from malformed input rather than the socket.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownMessageType(_)
                | ProtocolError::UnknownDataMessageType(_)
                | ProtocolError::OversizedMessage(_)
                | ProtocolError::MalformedPayload(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
