//! Connection lifecycle.

/// Lifecycle state of a [`Connection`](super::Connection).
///
/// ```text
/// Connecting -> Open -> Closing -> Closed
///      \          \________________/^
///       \__________________________/
/// ```
///
/// `Closed` is terminal and reachable from every state on a transport or
/// protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Upgrade handshake in progress.
    #[default]
    Connecting,
    /// Handshake accepted; data may flow both ways.
    Open,
    /// A close frame was sent; waiting for the peer's close or the grace period.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Only an open connection accepts outgoing frames.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Frames are still read while the close handshake is in flight.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (*self, next),
            (Connecting, Open) | (Open, Closing) | (Connecting | Open | Closing, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        })
    }
}
