//! Owner of every live connection.
//!
//! Connections are keyed by [`ConnectionId`] and each sits behind its own
//! async mutex, so at most one task reads or writes a given connection at a
//! time while different connections proceed in parallel.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ ConnectionPool                           │
//! │  slots: #1 → Mutex<Connection>           │
//! │         #2 → Mutex<Connection>           │
//! │         ...                              │
//! │  cancel: watch<bool> ──► every receive() │
//! └──────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::close::CloseCode;
use crate::config::Config;
use crate::connection::{Connection, ConnectionId, Role};
use crate::error::{Error, Result};
use crate::transport::{Transport, Upgraded};

type Slot<S> = Arc<AsyncMutex<Connection<S>>>;

/// Pool-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of live connections. `None` means unbounded.
    ///
    /// Default: None
    pub capacity: Option<usize>,

    /// How long [`ConnectionPool::shutdown`] waits for close handshakes.
    ///
    /// Default: 2 seconds
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Exclusive access to one pooled connection.
///
/// Holding this is holding the connection's lock; drop it to let other
/// tasks in.
pub struct PooledConnection<S> {
    guard: OwnedMutexGuard<Connection<S>>,
}

impl<S> Deref for PooledConnection<S> {
    type Target = Connection<S>;

    fn deref(&self) -> &Connection<S> {
        &self.guard
    }
}

impl<S> DerefMut for PooledConnection<S> {
    fn deref_mut(&mut self) -> &mut Connection<S> {
        &mut self.guard
    }
}

impl<S> std::fmt::Debug for PooledConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.guard.fmt(f)
    }
}

/// Set of live connections with a capacity limit and a shared shutdown signal.
pub struct ConnectionPool<S> {
    config: PoolConfig,
    connection_config: Config,
    slots: parking_lot::Mutex<HashMap<ConnectionId, Slot<S>>>,
    next_id: AtomicU64,
    /// Admitted plus in-flight handshakes; bounded by `capacity`.
    reserved: AtomicUsize,
    cancel: watch::Sender<bool>,
    shut_down: AtomicBool,
}

impl<S> std::fmt::Debug for ConnectionPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl<S> ConnectionPool<S> {
    /// Create an empty pool; `connection_config` applies to every connection.
    pub fn new(config: PoolConfig, connection_config: Config) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            connection_config,
            slots: parking_lot::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            reserved: AtomicUsize::new(0),
            cancel,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn connection_config(&self) -> &Config {
        &self.connection_config
    }

    /// Number of admitted connections.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Identifiers of admitted connections, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.slots.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Receiver that turns `true` when the pool shuts down.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    fn reserve(&self) -> Result<()> {
        let Some(max) = self.config.capacity else {
            self.reserved.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| Error::CapacityExceeded { max })
    }

    fn release(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }

    fn remove_slot(&self, id: ConnectionId) -> Option<Slot<S>> {
        let slot = self.slots.lock().remove(&id);
        if slot.is_some() {
            self.release();
        }
        slot
    }

    fn snapshot(&self) -> Vec<(ConnectionId, Slot<S>)> {
        let mut slots: Vec<_> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();
        slots.sort_unstable_by_key(|(id, _)| *id);
        slots
    }
}

impl<S> ConnectionPool<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Establish a connection through `transport` and admit it.
    ///
    /// Client transports dial the target; server transports wait for the
    /// next peer. The upgrade is bounded by the handshake timeout.
    ///
    /// # Errors
    ///
    /// - `Error::CapacityExceeded` if the pool is full
    /// - `Error::Timeout` if the handshake does not finish in time
    /// - `Error::Cancelled` if the pool has shut down
    /// - any transport or handshake error
    pub async fn acquire<T>(&self, transport: &T) -> Result<ConnectionId>
    where
        T: Transport<Stream = S>,
    {
        if self.is_shut_down() {
            return Err(Error::Cancelled);
        }
        self.reserve()?;

        let limit = self.connection_config.timeouts.handshake;
        let upgraded = match timeout(limit, transport.establish()).await {
            Ok(Ok(upgraded)) => upgraded,
            Ok(Err(e)) => {
                self.release();
                warn!(error = %e, "connection attempt failed");
                return Err(e);
            }
            Err(_) => {
                self.release();
                warn!(?limit, "handshake timed out");
                return Err(Error::Timeout(limit));
            }
        };
        self.admit(upgraded, transport.role())
    }

    /// Admit a stream that has already completed the upgrade.
    ///
    /// # Errors
    ///
    /// - `Error::CapacityExceeded` if the pool is full
    /// - `Error::Cancelled` if the pool has shut down
    pub fn adopt(&self, stream: S, role: Role) -> Result<ConnectionId> {
        self.adopt_upgraded(
            Upgraded {
                stream,
                leftover: BytesMut::new(),
            },
            role,
        )
    }

    /// Like [`adopt`](Self::adopt), keeping frame bytes that were read
    /// together with the handshake.
    ///
    /// # Errors
    ///
    /// Same as [`adopt`](Self::adopt).
    pub fn adopt_upgraded(&self, upgraded: Upgraded<S>, role: Role) -> Result<ConnectionId> {
        if self.is_shut_down() {
            return Err(Error::Cancelled);
        }
        self.reserve()?;
        self.admit(upgraded, role)
    }

    /// Store an upgraded stream. The caller holds a reservation.
    fn admit(&self, upgraded: Upgraded<S>, role: Role) -> Result<ConnectionId> {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let conn = Connection::with_buffered(
            id,
            upgraded.stream,
            role,
            self.connection_config.clone(),
            upgraded.leftover,
        )
        .with_cancel(self.cancel.subscribe());

        {
            let mut slots = self.slots.lock();
            // Checked under the lock so shutdown's drain cannot miss us.
            if self.is_shut_down() {
                drop(slots);
                self.release();
                return Err(Error::Cancelled);
            }
            slots.insert(id, Arc::new(AsyncMutex::new(conn)));
        }
        debug!(conn = %id, %role, "admitted");
        Ok(id)
    }

    /// Lock one connection for exclusive use.
    ///
    /// # Errors
    ///
    /// `Error::UnknownConnection` if `id` is not (or no longer) in the pool.
    pub async fn lock(&self, id: ConnectionId) -> Result<PooledConnection<S>> {
        let slot = self
            .slots
            .lock()
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownConnection(id))?;
        Ok(PooledConnection {
            guard: slot.lock_owned().await,
        })
    }

    /// Remove a connection from the pool and drop it to `Closed`.
    ///
    /// If another task still holds the connection, it is released when
    /// that task lets go. Returns `false` if `id` was not in the pool.
    pub async fn retire(&self, id: ConnectionId) -> bool {
        let Some(slot) = self.remove_slot(id) else {
            return false;
        };
        match slot.try_lock_owned() {
            Ok(mut conn) => conn.force_close().await,
            Err(_) => debug!(conn = %id, "retired while busy"),
        }
        debug!(conn = %id, "retired");
        true
    }

    /// Run `f` on every open connection, one at a time.
    ///
    /// The set of connections is fixed when the call starts. Connections that
    /// turned `Closed` are skipped and removed from the pool, and connections
    /// another task holds right now are skipped; each is visited at most
    /// once. Returns how many connections `f` was applied to.
    pub async fn for_each<F, Fut>(&self, mut f: F) -> usize
    where
        F: FnMut(PooledConnection<S>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut visited = 0;
        for (id, slot) in self.snapshot() {
            let Ok(guard) = slot.try_lock_owned() else {
                debug!(conn = %id, "busy, skipped");
                continue;
            };
            let conn = PooledConnection { guard };
            if conn.state().is_terminal() {
                drop(conn);
                self.remove_slot(id);
                continue;
            }
            if !conn.is_open() {
                continue;
            }
            f(conn).await;
            visited += 1;
        }
        visited
    }

    /// Close every connection and refuse new ones.
    ///
    /// In-flight receives and blocked sends are cancelled, then each
    /// connection gets a `GoingAway` close handshake bounded by
    /// `shutdown_grace`. Stragglers are force-closed, at the latest when
    /// their holder lets go. Calling this again does nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.send_replace(true);

        let drained: Vec<_> = self.slots.lock().drain().collect();
        info!(connections = drained.len(), "pool shutting down");

        let grace = self.config.shutdown_grace;
        join_all(drained.into_iter().map(|(id, slot)| async move {
            self.release();
            let closing = async {
                let mut conn = slot.lock().await;
                conn.close(CloseCode::GoingAway, "shutdown").await
            };
            match timeout(grace, closing).await {
                Ok(Ok(())) => debug!(conn = %id, "closed"),
                Ok(Err(e)) => debug!(conn = %id, error = %e, "close failed"),
                Err(_) => match Arc::clone(&slot).try_lock_owned() {
                    Ok(mut conn) => conn.force_close().await,
                    Err(_) => {
                        warn!(conn = %id, "still busy after grace, closing once released");
                        tokio::spawn(async move { slot.lock_owned().await.force_close().await });
                    }
                },
            }
        }))
        .await;

        info!("pool shut down");
    }
}
