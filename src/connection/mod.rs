//! A single WebSocket connection and its lifecycle.
//!
//! ## Lifecycle
//!
//! 1. **Open** - the transport finished the upgrade handshake
//! 2. **Closing** - a close frame was sent, waiting for the peer's
//! 3. **Closed** - both close frames exchanged, grace period elapsed, or a
//!    transport/protocol error
//!
//! ```rust,ignore
//! use wsbench::{CloseCode, Config, Connection, ConnectionId, Frame, Role};
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:9001").await?;
//! // after the HTTP upgrade:
//! let mut conn = Connection::new(ConnectionId::new(1), stream, Role::Client, Config::client());
//! conn.send(Frame::text("Hello")).await?;
//! if let Some(frame) = conn.receive().await? {
//!     println!("Received: {:?}", frame);
//! }
//! conn.close(CloseCode::Normal, "done").await?;
//! ```

mod fragmenter;
mod id;
mod role;
mod state;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::Connection;
pub use fragmenter::Fragmenter;
pub use id::ConnectionId;
pub use role::Role;
pub use state::ConnectionState;
