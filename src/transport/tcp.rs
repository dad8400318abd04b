use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::debug;
use url::Url;

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::transport::handshake::{client_handshake, server_handshake};
use crate::transport::{Transport, Upgraded};

/// Dials a `ws://` endpoint and performs the client handshake.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    host: String,
    path: String,
    limits: Limits,
}

impl TcpConnector {
    /// Parse a `ws://host[:port][/path][?query]` target.
    ///
    /// # Errors
    ///
    /// `Error::InvalidTarget` for unparsable URLs, schemes other than `ws`,
    /// or URLs without a host.
    pub fn from_url(target: &str) -> Result<Self> {
        let url = Url::parse(target)
            .map_err(|e| Error::InvalidTarget(format!("invalid url '{target}': {e}")))?;
        match url.scheme() {
            "ws" => {}
            "wss" => {
                return Err(Error::InvalidTarget(format!(
                    "'{target}': TLS endpoints are not supported"
                )));
            }
            other => {
                return Err(Error::InvalidTarget(format!(
                    "unsupported scheme '{other}' in '{target}' (expected ws)"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidTarget(format!("'{target}' has no host")))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            addr: format!("{host}:{port}"),
            host: match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            },
            path,
            limits: Limits::default(),
        })
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// `host:port` dialled by [`establish`](Transport::establish).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Request target sent in the upgrade request.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for TcpConnector {
    type Stream = TcpStream;

    fn role(&self) -> Role {
        Role::Client
    }

    async fn establish(&self) -> Result<Upgraded<TcpStream>> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let leftover = client_handshake(&mut stream, &self.host, &self.path, &self.limits).await?;
        debug!(addr = %self.addr, path = %self.path, "upgraded");
        Ok(Upgraded { stream, leftover })
    }
}

/// Accepts TCP connections and performs the server handshake.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    limits: Limits,
}

impl TcpAcceptor {
    /// Bind a listener.
    ///
    /// # Errors
    ///
    /// `Error::Io` if binding fails.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self::from_listener(TcpListener::bind(addr).await?))
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            listener,
            limits: Limits::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Accept the next TCP connection without upgrading it.
    ///
    /// # Errors
    ///
    /// `Error::Io` if accepting fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }
}

impl Transport for TcpAcceptor {
    type Stream = TcpStream;

    fn role(&self) -> Role {
        Role::Server
    }

    async fn establish(&self) -> Result<Upgraded<TcpStream>> {
        let (mut stream, peer) = self.accept().await?;
        let (request, leftover) = server_handshake(&mut stream, &self.limits).await?;
        debug!(%peer, path = %request.path, "accepted upgrade");
        Ok(Upgraded { stream, leftover })
    }
}
