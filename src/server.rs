//! Echo target: accepts WebSocket clients and sends every data message back.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{Config, Limits};
use crate::connection::{ConnectionId, Role};
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::transport::{TcpAcceptor, Upgraded, server_handshake};

/// Counters kept while serving.
#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    messages: AtomicU64,
    bytes: AtomicU64,
}

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Connections that completed the upgrade and entered the pool.
    pub accepted: u64,
    /// Connections refused for a failed handshake or a full pool.
    pub rejected: u64,
    pub messages_echoed: u64,
    pub bytes_echoed: u64,
}

/// Serves connections out of a [`ConnectionPool`] until the pool shuts down.
///
/// Each accepted socket is upgraded in its own task, so a slow handshake
/// never holds up the accept loop.
#[derive(Debug)]
pub struct EchoServer {
    acceptor: TcpAcceptor,
    pool: Arc<ConnectionPool<TcpStream>>,
    counters: Arc<Counters>,
}

impl EchoServer {
    /// Bind a listener and create a server-role pool for it.
    ///
    /// # Errors
    ///
    /// `Error::Io` if binding fails.
    pub async fn bind(addr: impl ToSocketAddrs, pool: PoolConfig, config: Config) -> Result<Self> {
        let acceptor = TcpAcceptor::bind(addr).await?.with_limits(config.limits);
        Ok(Self::new(acceptor, Arc::new(ConnectionPool::new(pool, config))))
    }

    pub fn new(acceptor: TcpAcceptor, pool: Arc<ConnectionPool<TcpStream>>) -> Self {
        Self {
            acceptor,
            pool,
            counters: Arc::default(),
        }
    }

    /// # Errors
    ///
    /// `Error::Io` if the socket cannot report its address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<TcpStream>> {
        &self.pool
    }

    pub fn stats(&self) -> ServerStats {
        let c = &self.counters;
        ServerStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            messages_echoed: c.messages.load(Ordering::Relaxed),
            bytes_echoed: c.bytes.load(Ordering::Relaxed),
        }
    }

    /// Accept and echo until [`ConnectionPool::shutdown`] is called.
    pub async fn run(&self) {
        let mut shutdown = self.pool.subscribe();
        info!(addr = ?self.acceptor.local_addr().ok(), "echo server listening");

        loop {
            let accepted = tokio::select! {
                accepted = self.acceptor.accept() => accepted,
                () = shut_down(&mut shutdown) => break,
            };
            match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve(
                        stream,
                        peer,
                        Arc::clone(&self.pool),
                        Arc::clone(&self.counters),
                        *self.acceptor.limits(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }

        info!(stats = ?self.stats(), "echo server stopped");
    }
}

async fn shut_down(rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the pool is gone, which also ends serving.
    let _ = rx.wait_for(|down| *down).await;
}

async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    pool: Arc<ConnectionPool<TcpStream>>,
    counters: Arc<Counters>,
    limits: Limits,
) {
    let limit = pool.connection_config().timeouts.handshake;
    let leftover = match timeout(limit, server_handshake(&mut stream, &limits)).await {
        Ok(Ok((_, leftover))) => leftover,
        Ok(Err(e)) => {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(%peer, error = %e, "handshake rejected");
            return;
        }
        Err(_) => {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(%peer, ?limit, "handshake timed out");
            return;
        }
    };

    let id = match pool.adopt_upgraded(Upgraded { stream, leftover }, Role::Server) {
        Ok(id) => id,
        Err(e) => {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(%peer, error = %e, "connection refused");
            return;
        }
    };
    counters.accepted.fetch_add(1, Ordering::Relaxed);
    debug!(conn = %id, %peer, "serving");

    echo(&pool, id, &counters).await;
    pool.retire(id).await;
}

async fn echo(pool: &ConnectionPool<TcpStream>, id: ConnectionId, counters: &Counters) {
    loop {
        let Ok(mut conn) = pool.lock(id).await else {
            return;
        };
        let frame = match conn.receive().await {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(Error::Cancelled) => return,
            Err(e) => {
                debug!(conn = %id, error = %e, "receive failed");
                return;
            }
        };
        let len = frame.len() as u64;
        if let Err(e) = conn.send(frame).await {
            debug!(conn = %id, error = %e, "echo failed");
            return;
        }
        counters.messages.fetch_add(1, Ordering::Relaxed);
        counters.bytes.fetch_add(len, Ordering::Relaxed);
    }
}
