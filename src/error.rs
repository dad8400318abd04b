//! Error types for frame decoding, connection management and load generation.
//!
//! Every fallible operation in the crate returns [`Error`]. Errors are grouped
//! into the coarse classes of [`ErrorKind`] so the pool and the workload driver
//! can decide whether a connection survives, can be retried, or must be retired.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionId;

/// Result type alias for benchmark operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed frame or frame sequence. Fatal to the connection.
    Protocol,
    /// Read/write failure or failed upgrade handshake. Fatal to the connection.
    Transport,
    /// The pool is at its configured capacity. The caller may retry later.
    Capacity,
    /// No response within the configured bound.
    Timeout,
    /// The connection is closed, unknown, or was cancelled by a shutdown.
    Closed,
}

/// Errors that can occur while benchmarking a WebSocket peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid frame sequence (fragmentation rules, unexpected opcode).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Frame payload exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Announced payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Reassembled message exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size the message would reach.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Fragment count the message would reach.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// 64-bit payload length does not fit in `usize`.
    #[error("Payload length {size} exceeds platform maximum {max}")]
    PayloadTooLargeForPlatform {
        /// Announced payload size.
        size: u64,
        /// Largest addressable size.
        max: u64,
    },

    /// Not enough bytes buffered to decode a full frame.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Minimum number of additional bytes needed.
        needed: usize,
    },

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Opcode outside the 4-bit range.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Control frame with FIN=0.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload larger than 125 bytes.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked frame received by a server.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked frame received by a client.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// RSV bits set; no extensions are ever negotiated.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Close code that must not be sent on the wire.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// No connection with this identifier is held by the pool.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A pending receive was interrupted by a shutdown or run deadline.
    #[error("Operation cancelled")]
    Cancelled,

    /// HTTP upgrade handshake failed.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake head exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Target address could not be parsed or resolved.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(String),

    /// The pool is already holding its maximum number of connections.
    #[error("Connection pool at capacity ({max})")]
    CapacityExceeded {
        /// Configured capacity.
        max: usize,
    },

    /// No response within the configured bound.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::InvalidHandshake(_)
            | Error::HandshakeTooLarge { .. }
            | Error::InvalidTarget(_) => ErrorKind::Transport,
            Error::CapacityExceeded { .. } => ErrorKind::Capacity,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ConnectionClosed(_) | Error::UnknownConnection(_) | Error::Cancelled => {
                ErrorKind::Closed
            }
            _ => ErrorKind::Protocol,
        }
    }

    /// Returns `true` if the connection that produced this error can no longer be used.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Protocol | ErrorKind::Transport)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(Duration::ZERO)
    }
}
