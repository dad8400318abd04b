use std::time::Duration;

use serde::Serialize;

use crate::config::Limits;
use crate::error::Result;

/// Traffic shape each connection generates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Pattern {
    /// Send one message, wait for its echo, repeat.
    #[default]
    EchoRequestResponse,
    /// Send without waiting; echoes that happen to be ready are discarded.
    FireAndForget,
    /// Echo request/response paced to `per_second` messages per connection.
    FixedRate { per_second: f64 },
}

impl Pattern {
    /// Whether the pattern waits for an echo of every message.
    pub fn awaits_echo(&self) -> bool {
        !matches!(self, Pattern::FireAndForget)
    }
}

/// Payload opcode for generated messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    #[default]
    Text,
    Binary,
}

/// Options for one [`Driver::run`](super::Driver::run).
///
/// A run stops when either `duration` elapses or every connection has sent
/// `message_count` messages, whichever comes first. With neither set the
/// run lasts until the pool shuts down.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchConfig {
    /// Connections to open before the run.
    ///
    /// Default: 1
    pub connection_count: usize,

    /// Payload size of each message in bytes.
    ///
    /// Default: 128
    pub message_size: usize,

    /// Default: echo request/response
    pub pattern: Pattern,

    /// Wall-clock limit, measured from the moment all workers are released.
    ///
    /// Default: None
    pub duration: Option<Duration>,

    /// Messages per connection.
    ///
    /// Default: 100
    pub message_count: Option<u64>,

    /// How long to wait for each echo before the exchange counts as a
    /// timeout.
    ///
    /// Default: None, which uses the pool's `Timeouts::receive`
    pub receive_timeout: Option<Duration>,

    /// Default: text
    pub payload: PayloadKind,

    /// Pause between opening the connections and starting measurement.
    ///
    /// Default: 0
    pub warmup: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            connection_count: 1,
            message_size: 128,
            pattern: Pattern::default(),
            duration: None,
            message_count: Some(100),
            receive_timeout: None,
            payload: PayloadKind::default(),
            warmup: Duration::ZERO,
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connections(mut self, count: usize) -> Self {
        self.connection_count = count;
        self
    }

    pub fn with_message_size(mut self, size: usize) -> Self {
        self.message_size = size;
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_message_count(mut self, count: u64) -> Self {
        self.message_count = Some(count);
        self
    }

    /// Drop the per-connection message limit so only `duration` stops the run.
    pub fn unbounded(mut self) -> Self {
        self.message_count = None;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn with_payload(mut self, payload: PayloadKind) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Check that connections configured with `limits` can carry the
    /// generated messages.
    ///
    /// # Errors
    ///
    /// `Error::MessageTooLarge` if `message_size` exceeds `max_message_size`.
    pub fn check(&self, limits: &Limits) -> Result<()> {
        limits.check_message_size(self.message_size)
    }

    /// Whether `sent` messages on one connection exhaust the message limit.
    pub(crate) fn is_done(&self, sent: u64) -> bool {
        self.message_count.is_some_and(|max| sent >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BenchConfig::default();
        assert_eq!(config.pattern, Pattern::EchoRequestResponse);
        assert_eq!(config.message_count, Some(100));
        assert!(config.duration.is_none());
        assert_eq!(config.payload, PayloadKind::Text);
    }

    #[test]
    fn test_builder() {
        let config = BenchConfig::new()
            .with_connections(50)
            .with_message_size(1024)
            .with_pattern(Pattern::FixedRate { per_second: 10.0 })
            .with_duration(Duration::from_secs(30))
            .unbounded();
        assert_eq!(config.connection_count, 50);
        assert_eq!(config.message_size, 1024);
        assert!(config.pattern.awaits_echo());
        assert_eq!(config.message_count, None);
        assert!(!config.is_done(u64::MAX));
    }

    #[test]
    fn test_is_done() {
        let config = BenchConfig::new().with_message_count(3);
        assert!(!config.is_done(2));
        assert!(config.is_done(3));
    }

    #[test]
    fn test_check_against_limits() {
        let limits = Limits::default();
        assert!(BenchConfig::new().with_message_size(3 * 1024 * 1024).check(&limits).is_ok());
        assert!(matches!(
            BenchConfig::new()
                .with_message_size(limits.max_message_size + 1)
                .check(&limits),
            Err(crate::Error::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_fire_and_forget_does_not_await_echo() {
        assert!(!Pattern::FireAndForget.awaits_echo());
    }
}
