//! # wsbench - WebSocket load generator and echo target
//!
//! `wsbench` opens many concurrent RFC 6455 connections, drives traffic over
//! them and reports latency and throughput. The same crate can also play
//! the other side: an echo server that sends every message back.
//!
//! ## Layers
//!
//! - [`protocol`]: frame codec (masking, fragmentation, validation)
//! - [`connection`]: one stream plus its close state machine
//! - [`pool`]: the set of live connections, capacity, shutdown
//! - [`driver`]: traffic patterns and per-message sampling
//! - [`metrics`]: samples and the aggregated [`Report`]
//! - [`transport`]: TCP plus the HTTP upgrade handshake
//! - [`server`]: echo target
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wsbench::{BenchConfig, Config, ConnectionPool, Driver, Metrics, PoolConfig, TcpConnector};
//!
//! let transport = TcpConnector::from_url("ws://127.0.0.1:9001/")?;
//! let pool = Arc::new(ConnectionPool::new(PoolConfig::new(), Config::client()));
//! let driver = Driver::new(Arc::clone(&pool), Arc::new(Metrics::new()));
//!
//! let config = BenchConfig::new().with_connections(50).with_message_count(100);
//! let report = driver.run(&transport, &config).await;
//! println!("{report}");
//! pool.shutdown().await;
//! ```

pub mod close;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod transport;

pub use close::{CloseCode, CloseFrame};
pub use config::{Config, Limits, Timeouts};
pub use connection::{Connection, ConnectionId, ConnectionState, Role};
pub use driver::{BenchConfig, Driver, Pattern, PayloadKind};
pub use error::{Error, ErrorKind, Result};
pub use metrics::{LatencyStats, Metrics, Outcome, Report, Sample};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use protocol::{Decoded, Frame, FrameCodec, OpCode};
pub use server::{EchoServer, ServerStats};
pub use transport::{TcpAcceptor, TcpConnector, Transport, Upgraded};
