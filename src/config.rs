//! Configuration and limits for benchmark connections.

use std::time::Duration;

use crate::error::{Error, Result};

/// Resource limits enforced by the frame codec and the handshake reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single frame in bytes.
    ///
    /// Default: 16 MB
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum number of frames in a single fragmented message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,

    /// Maximum size of the HTTP upgrade head in bytes.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Limits in field order: frame, message, fragment count, handshake head.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Validate that a frame payload size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`] if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a handshake head size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeouts applied to a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to connect and complete the HTTP upgrade.
    ///
    /// Default: 10 seconds
    pub handshake: Duration,

    /// How long a benchmark waits for each echo unless the run overrides it.
    ///
    /// Default: 5 seconds
    pub receive: Duration,

    /// How long a close handshake may wait for the peer's close frame
    /// before the connection is force-closed.
    ///
    /// Default: 2 seconds
    pub close_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            receive: Duration::from_secs(5),
            close_grace: Duration::from_secs(2),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn new(handshake: Duration, receive: Duration, close_grace: Duration) -> Self {
        Self {
            handshake,
            receive,
            close_grace,
        }
    }
}

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Outgoing data payloads larger than this are split into continuation frames.
    ///
    /// Default: 16 KB
    pub fragment_size: usize,

    /// Accept unmasked frames on a server-role connection.
    ///
    /// RFC 6455 requires clients to mask every frame; enabling this is only
    /// useful against non-conforming load generators.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Initial read buffer capacity in bytes.
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,

    /// Initial write buffer capacity in bytes.
    ///
    /// Default: 8 KB
    pub write_buffer_size: usize,

    /// Handshake, receive and close timeouts.
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            accept_unmasked_frames: false,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for a client-role connection.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    /// Defaults for a server-role connection.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Replace every limit at once.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.receive = timeout;
        self
    }

    #[must_use]
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.timeouts.close_grace = grace;
        self
    }
}
