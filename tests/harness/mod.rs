//! Shared fixtures for integration tests.
//!
//! Spawns echo and silent WebSocket servers on random local ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wsbench::transport::server_handshake;
use wsbench::{
    Config, ConnectionPool, Driver, EchoServer, Limits, Metrics, PoolConfig, TcpConnector,
};

/// Echo server running in the background.
pub struct TestServer {
    server: Arc<EchoServer>,
    handle: JoinHandle<()>,
    pub addr: SocketAddr,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let pool = PoolConfig::new().with_shutdown_grace(Duration::from_millis(500));
        let server = Arc::new(
            EchoServer::bind("127.0.0.1:0", pool, Config::server())
                .await
                .unwrap(),
        );
        let addr = server.local_addr().unwrap();
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.run().await });
        Self {
            server,
            handle,
            addr,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/bench", self.addr)
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::from_url(&self.url()).unwrap()
    }

    pub fn server(&self) -> &EchoServer {
        &self.server
    }

    pub async fn shutdown(self) {
        self.server.pool().shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), self.handle).await;
    }
}

/// Completes the upgrade, then reads and discards everything without ever
/// replying.
pub struct SilentServer {
    handle: JoinHandle<()>,
    pub addr: SocketAddr,
}

impl SilentServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(swallow(stream));
            }
        });
        Self { handle, addr }
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::from_url(&format!("ws://{}/", self.addr)).unwrap()
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn swallow(mut stream: TcpStream) {
    if server_handshake(&mut stream, &Limits::default()).await.is_err() {
        return;
    }
    let _ = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await;
}

/// Client-role pool and driver sharing one metrics store.
pub fn client_driver(
    close_grace: Duration,
) -> (Arc<ConnectionPool<TcpStream>>, Driver<TcpStream>) {
    let pool = Arc::new(ConnectionPool::new(
        PoolConfig::new().with_shutdown_grace(Duration::from_secs(1)),
        Config::client().with_close_grace(close_grace),
    ));
    let driver = Driver::new(Arc::clone(&pool), Arc::new(Metrics::new()));
    (pool, driver)
}
