//! Byte-stream transports and the WebSocket upgrade.
//!
//! A [`Transport`] produces streams that have already completed the HTTP
//! upgrade, so the pool only ever sees open WebSocket streams.

pub mod handshake;
mod tcp;

use std::future::Future;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::Role;
use crate::error::Result;

pub use handshake::{
    HandshakeRequest, HandshakeResponse, WS_GUID, client_handshake, compute_accept_key,
    generate_key, server_handshake,
};
pub use tcp::{TcpAcceptor, TcpConnector};

/// A stream that finished the upgrade handshake.
#[derive(Debug)]
pub struct Upgraded<S> {
    pub stream: S,
    /// Frame bytes that arrived in the same read as the handshake.
    pub leftover: BytesMut,
}

/// Source of upgraded streams: dials out (client role) or accepts (server role).
pub trait Transport: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Role the resulting connections play.
    fn role(&self) -> Role;

    /// Produce the next upgraded stream.
    fn establish(&self) -> impl Future<Output = Result<Upgraded<Self::Stream>>> + Send;
}
