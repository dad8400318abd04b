//! Which end of the connection this side plays.

/// Connection role.
///
/// RFC 6455 ties masking to the role: clients mask every frame they send,
/// servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opened the connection; masks outgoing frames.
    Client,
    /// Accepted the connection; sends frames unmasked.
    Server,
}

impl Role {
    /// Returns `true` if outgoing frames must carry a masking key.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Returns `true` if incoming frames are expected to be masked.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }

    /// The role of the other endpoint.
    #[inline]
    #[must_use]
    pub const fn peer(&self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Client => "client",
            Role::Server => "server",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_follows_role() {
        assert!(Role::Client.must_mask());
        assert!(!Role::Client.expects_masked());
        assert!(!Role::Server.must_mask());
        assert!(Role::Server.expects_masked());
    }

    #[test]
    fn test_peer_expects_what_we_send() {
        for role in [Role::Client, Role::Server] {
            assert_eq!(role.must_mask(), role.peer().expects_masked());
            assert_eq!(role.peer().peer(), role);
        }
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.to_string(), "server");
    }
}
