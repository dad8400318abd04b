//! Per-message samples and the aggregated report.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::connection::ConnectionId;

/// How a measured exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
    Timeout,
}

/// One measured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub connection: ConnectionId,
    /// Payload size in bytes.
    pub size: usize,
    pub sent_at: Instant,
    /// When the echo arrived, the write was flushed (fire-and-forget), or the
    /// failure was observed.
    pub received_at: Instant,
    pub outcome: Outcome,
}

impl Sample {
    #[must_use]
    pub fn success(
        connection: ConnectionId,
        size: usize,
        sent_at: Instant,
        received_at: Instant,
    ) -> Self {
        Self {
            connection,
            size,
            sent_at,
            received_at,
            outcome: Outcome::Success,
        }
    }

    /// A failed exchange, stamped now.
    #[must_use]
    pub fn failure(connection: ConnectionId, size: usize, sent_at: Instant, outcome: Outcome) -> Self {
        Self {
            connection,
            size,
            sent_at,
            received_at: Instant::now(),
            outcome,
        }
    }

    #[must_use]
    pub fn latency(&self) -> Duration {
        self.received_at.saturating_duration_since(self.sent_at)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Thread-safe, append-only sample store.
#[derive(Debug, Default)]
pub struct Metrics {
    samples: Mutex<Vec<Sample>>,
    connect_failures: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sample: Sample) {
        self.samples.lock().push(sample);
    }

    /// Count a connection that could not be established.
    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Copy of every sample recorded so far, in recording order.
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().clone()
    }

    /// Aggregate a snapshot of the samples. Does not modify the store.
    pub fn report(&self) -> Report {
        let samples = self.samples();
        Report::from_samples(&samples, self.connect_failures.load(Ordering::Relaxed))
    }
}

/// Latency distribution of successful samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    #[serde(rename = "min_us", serialize_with = "as_micros")]
    pub min: Duration,
    #[serde(rename = "max_us", serialize_with = "as_micros")]
    pub max: Duration,
    #[serde(rename = "mean_us", serialize_with = "as_micros")]
    pub mean: Duration,
    #[serde(rename = "p50_us", serialize_with = "as_micros")]
    pub p50: Duration,
    #[serde(rename = "p90_us", serialize_with = "as_micros")]
    pub p90: Duration,
    #[serde(rename = "p99_us", serialize_with = "as_micros")]
    pub p99: Duration,
}

impl LatencyStats {
    /// `None` for an empty input.
    #[must_use]
    pub fn from_latencies(mut latencies: Vec<Duration>) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        latencies.sort_unstable();

        let total: u128 = latencies.iter().map(Duration::as_nanos).sum();
        let mean = total / latencies.len() as u128;
        Some(Self {
            min: latencies[0],
            max: latencies[latencies.len() - 1],
            mean: Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX)),
            p50: percentile(&latencies, 0.50),
            p90: percentile(&latencies, 0.90),
            p99: percentile(&latencies, 0.99),
        })
    }
}

/// Nearest-rank percentile over sorted, non-empty input.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn as_micros<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// All samples, whatever their outcome.
    pub count: usize,
    pub successes: usize,
    /// Samples that did not succeed, timeouts included.
    pub errors: usize,
    pub timeouts: usize,
    /// `errors / count`, 0 when there are no samples.
    pub error_rate: f64,
    /// Payload bytes of successful samples.
    pub bytes_transferred: u64,
    /// Connections that could not be established.
    pub failed_connections: u64,
    /// From the first send to the last completion.
    #[serde(rename = "span_us", serialize_with = "as_micros")]
    pub span: Duration,
    /// Successful messages per second over `span`.
    pub throughput: f64,
    pub latency: Option<LatencyStats>,
}

impl Report {
    #[must_use]
    pub fn from_samples(samples: &[Sample], failed_connections: u64) -> Self {
        let count = samples.len();
        let successes = samples.iter().filter(|s| s.is_success()).count();
        let timeouts = samples
            .iter()
            .filter(|s| s.outcome == Outcome::Timeout)
            .count();
        let errors = count - successes;

        let bytes_transferred = samples
            .iter()
            .filter(|s| s.is_success())
            .map(|s| s.size as u64)
            .sum();

        let span = match (
            samples.iter().map(|s| s.sent_at).min(),
            samples.iter().map(|s| s.received_at).max(),
        ) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        };
        let secs = span.as_secs_f64();

        Self {
            count,
            successes,
            errors,
            timeouts,
            error_rate: if count == 0 {
                0.0
            } else {
                errors as f64 / count as f64
            },
            bytes_transferred,
            failed_connections,
            span,
            throughput: if secs > 0.0 {
                successes as f64 / secs
            } else {
                0.0
            },
            latency: LatencyStats::from_latencies(
                samples
                    .iter()
                    .filter(|s| s.is_success())
                    .map(Sample::latency)
                    .collect(),
            ),
        }
    }

    /// Render as a single-line JSON object.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║                    BENCHMARK REPORT                          ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════════════════╣")?;
        writeln!(f, "║  Span:                {:>10.3}s                           ║", self.span.as_secs_f64())?;
        writeln!(f, "║  Failed connections:  {:>10}                             ║", self.failed_connections)?;
        writeln!(f, "╠══════════════════════════════════════════════════════════════╣")?;
        writeln!(f, "║  MESSAGES                                                    ║")?;
        writeln!(f, "║    Total:             {:>10}                             ║", self.count)?;
        writeln!(f, "║    Succeeded:         {:>10}                             ║", self.successes)?;
        writeln!(f, "║    Errors:            {:>10}                             ║", self.errors)?;
        writeln!(f, "║    Timeouts:          {:>10}                             ║", self.timeouts)?;
        writeln!(f, "║    Error rate:        {:>10.2} %                         ║", self.error_rate * 100.0)?;
        writeln!(f, "║    Rate:              {:>10.1} msg/s                      ║", self.throughput)?;
        writeln!(f, "║    Bytes:             {:>10}                             ║", self.bytes_transferred)?;
        writeln!(f, "╠══════════════════════════════════════════════════════════════╣")?;
        writeln!(f, "║  LATENCY                                                     ║")?;
        match &self.latency {
            Some(l) => {
                writeln!(f, "║    Min:               {:>10.3} ms                        ║", ms(l.min))?;
                writeln!(f, "║    Mean:              {:>10.3} ms                        ║", ms(l.mean))?;
                writeln!(f, "║    P50:               {:>10.3} ms                        ║", ms(l.p50))?;
                writeln!(f, "║    P90:               {:>10.3} ms                        ║", ms(l.p90))?;
                writeln!(f, "║    P99:               {:>10.3} ms                        ║", ms(l.p99))?;
                writeln!(f, "║    Max:               {:>10.3} ms                        ║", ms(l.max))?;
            }
            None => writeln!(f, "║    (no successful samples)                                   ║")?,
        }
        write!(f, "╚══════════════════════════════════════════════════════════════╝")
    }
}
