//! Load generation across a [`ConnectionPool`].
//!
//! Every connection gets one worker task. Workers wait on a shared barrier so
//! they all start at the same instant, then send messages according to the
//! configured [`Pattern`] and record one [`Sample`] per message.
//!
//! ```text
//!  acquire ×N ──► warmup ──► barrier ──► worker #1 ─┐
//!                                        worker #2 ─┼─► Metrics ──► Report
//!                                        worker #N ─┘
//! ```

mod config;

pub use config::{BenchConfig, Pattern, PayloadKind};

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Barrier, watch};
use tokio::task::JoinSet;
use tokio::time::{Interval, MissedTickBehavior, timeout};
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::{Error, Result};
use crate::metrics::{Metrics, Outcome, Report, Sample};
use crate::pool::ConnectionPool;
use crate::protocol::Frame;
use crate::transport::Transport;

/// Runs a benchmark against connections owned by a pool.
#[derive(Debug)]
pub struct Driver<S> {
    pool: Arc<ConnectionPool<S>>,
    metrics: Arc<Metrics>,
}

impl<S> Clone for Driver<S> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(pool: Arc<ConnectionPool<S>>, metrics: Arc<Metrics>) -> Self {
        Self { pool, metrics }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<S>> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Open `connection_count` connections through `transport` and drive
    /// traffic until the stop condition is met.
    ///
    /// Failures on individual connections are recorded and the run goes on,
    /// so this always produces a report, possibly over partial results. A
    /// `config` whose messages the pool's limits cannot carry yields an
    /// empty report without connecting.
    /// Connections stay in the pool afterwards; shut the pool down to close
    /// them.
    pub async fn run<T>(&self, transport: &T, config: &BenchConfig) -> Report
    where
        T: Transport<Stream = S>,
    {
        info!(
            connections = config.connection_count,
            message_size = config.message_size,
            pattern = ?config.pattern,
            "benchmark starting"
        );

        if let Err(e) = config.check(&self.pool.connection_config().limits) {
            warn!(error = %e, "messages exceed connection limits, not starting");
            return self.metrics.report();
        }

        let ids = self.connect(transport, config.connection_count).await;
        if ids.is_empty() {
            warn!("no connection could be established");
            return self.metrics.report();
        }

        let receive_timeout = config
            .receive_timeout
            .unwrap_or(self.pool.connection_config().timeouts.receive);
        let config = Arc::new(config.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        let release = Arc::new(Barrier::new(ids.len() + 1));

        let mut workers = JoinSet::new();
        for id in ids {
            let worker = Worker {
                id,
                pool: Arc::clone(&self.pool),
                metrics: Arc::clone(&self.metrics),
                config: Arc::clone(&config),
                receive_timeout,
            };
            workers.spawn(worker.run(Arc::clone(&release), stop_rx.clone()));
        }

        if !config.warmup.is_zero() {
            debug!(warmup = ?config.warmup, "warming up");
            tokio::time::sleep(config.warmup).await;
        }
        release.wait().await;
        let started = Instant::now();

        let finished = async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "worker task failed");
                }
            }
        };
        tokio::pin!(finished);
        match config.duration {
            Some(limit) => {
                if timeout(limit, &mut finished).await.is_err() {
                    debug!(?limit, "deadline reached, stopping workers");
                    stop_tx.send_replace(true);
                    finished.await;
                }
            }
            None => finished.await,
        }

        let report = self.metrics.report();
        info!(
            elapsed = ?started.elapsed(),
            samples = report.count,
            errors = report.errors,
            "benchmark finished"
        );
        report
    }

    async fn connect<T>(&self, transport: &T, count: usize) -> Vec<ConnectionId>
    where
        T: Transport<Stream = S>,
    {
        let attempts = join_all((0..count).map(|_| self.pool.acquire(transport))).await;
        let mut ids = Vec::with_capacity(count);
        for attempt in attempts {
            match attempt {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(error = %e, "failed to open connection");
                    self.metrics.record_connect_failure();
                }
            }
        }
        debug!(opened = ids.len(), requested = count, "connections ready");
        ids
    }
}

enum Step {
    Continue,
    Stop,
}

struct Worker<S> {
    id: ConnectionId,
    pool: Arc<ConnectionPool<S>>,
    metrics: Arc<Metrics>,
    config: Arc<BenchConfig>,
    receive_timeout: Duration,
}

impl<S> Worker<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(self, release: Arc<Barrier>, mut stop: watch::Receiver<bool>) {
        release.wait().await;

        let mut pacing = match self.config.pattern {
            Pattern::FixedRate { per_second } => pacer(per_second),
            _ => None,
        };

        let mut sent = 0;
        while !self.config.is_done(sent) {
            let step = tokio::select! {
                biased;
                () = stopped(&mut stop) => break,
                step = self.step(sent, pacing.as_mut()) => step,
            };
            sent += 1;
            if let Step::Stop = step {
                break;
            }
        }
        debug!(conn = %self.id, sent, "worker done");
    }

    async fn step(&self, seq: u64, pacing: Option<&mut Interval>) -> Step {
        if let Some(interval) = pacing {
            interval.tick().await;
        }
        let Ok(mut conn) = self.pool.lock(self.id).await else {
            return Step::Stop;
        };
        if !conn.is_open() {
            return Step::Stop;
        }

        let size = self.config.message_size;
        let frame = payload(self.config.payload, size, seq);
        let sent_at = Instant::now();
        let result = if self.config.pattern.awaits_echo() {
            echo(&mut conn, frame, self.receive_timeout).await
        } else {
            fire(&mut conn, frame).await
        };

        match result {
            Ok(received_at) => {
                self.metrics
                    .record(Sample::success(self.id, size, sent_at, received_at));
                Step::Continue
            }
            Err(Error::Cancelled) => Step::Stop,
            Err(e) => {
                let outcome = match e {
                    Error::Timeout(_) => Outcome::Timeout,
                    _ => Outcome::Error,
                };
                warn!(conn = %self.id, seq, error = %e, "exchange failed, retiring connection");
                self.metrics
                    .record(Sample::failure(self.id, size, sent_at, outcome));
                drop(conn);
                self.pool.retire(self.id).await;
                Step::Stop
            }
        }
    }
}

/// Send `frame` and wait for an identical echo.
async fn echo<S>(conn: &mut Connection<S>, frame: Frame, limit: Duration) -> Result<Instant>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let expected = frame.payload_bytes().clone();
    conn.send(frame).await?;
    match timeout(limit, conn.receive()).await {
        Ok(Ok(Some(reply))) if reply.payload_bytes() == &expected => Ok(Instant::now()),
        Ok(Ok(Some(reply))) => Err(Error::ProtocolViolation(format!(
            "echo mismatch: expected {} bytes, got {}",
            expected.len(),
            reply.len()
        ))),
        Ok(Ok(None)) => Err(Error::ConnectionClosed(
            conn.peer_close().map(|close| close.code.as_u16()),
        )),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Timeout(limit)),
    }
}

/// Send `frame` without waiting for a reply. Echoes that are already
/// buffered are read and dropped so the peer never stalls on a full socket.
async fn fire<S>(conn: &mut Connection<S>, frame: Frame) -> Result<Instant>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send(frame).await?;
    let flushed = Instant::now();
    while conn.try_receive()?.is_some() {}
    if !conn.is_open() {
        return Err(Error::ConnectionClosed(
            conn.peer_close().map(|close| close.code.as_u16()),
        ));
    }
    Ok(flushed)
}

fn pacer(per_second: f64) -> Option<Interval> {
    let period = Duration::try_from_secs_f64(per_second.recip())
        .ok()
        .filter(|period| !period.is_zero())?;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Build message `seq` of exactly `size` bytes.
///
/// The sequence number leads the payload (hex for text, big-endian for
/// binary) so consecutive echoes are distinguishable; the rest is filler.
fn payload(kind: PayloadKind, size: usize, seq: u64) -> Frame {
    let mut buf = BytesMut::with_capacity(size);
    match kind {
        PayloadKind::Text => {
            buf.extend_from_slice(format!("{seq:016x}").as_bytes());
            buf.resize(size.max(buf.len()), b'.');
            buf.truncate(size);
            Frame::text(buf.freeze())
        }
        PayloadKind::Binary => {
            buf.extend_from_slice(&seq.to_be_bytes());
            buf.extend((buf.len()..size).map(|i| i as u8));
            buf.truncate(size);
            Frame::binary(buf.freeze())
        }
    }
}
