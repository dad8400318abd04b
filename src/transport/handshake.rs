//! HTTP/1.1 upgrade handshake (RFC 6455 Section 4).

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};

/// GUID appended to the client key before hashing (RFC 6455 Section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEAD_END: &[u8] = b"\r\n\r\n";

/// `Sec-WebSocket-Accept` for a client key: Base64(SHA-1(key + GUID)).
///
/// ```
/// use wsbench::transport::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh `Sec-WebSocket-Key`: 16 random bytes, Base64 encoded.
///
/// # Errors
///
/// `Error::InvalidHandshake` if the OS random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::InvalidHandshake(format!("no randomness for key: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Lower-cased header names to trimmed values. Repeating one of `unique`
/// is rejected.
fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
    unique: &[&str],
) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for line in lines.take_while(|line| !line.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::InvalidHandshake(format!("Malformed header line: {line}")));
        };
        let name = name.trim().to_ascii_lowercase();
        if unique.contains(&name.as_str()) && headers.contains_key(&name) {
            return Err(Error::InvalidHandshake(format!("Duplicate header: {name}")));
        }
        headers.insert(name, value.trim().to_string());
    }
    Ok(headers)
}

fn require<'h>(headers: &'h HashMap<String, String>, name: &str) -> Result<&'h str> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidHandshake(format!("Missing {name} header")))
}

fn check_upgrade_headers(headers: &HashMap<String, String>) -> Result<()> {
    let upgrade = require(headers, "upgrade")?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Upgrade header: {upgrade}"
        )));
    }
    let connection = require(headers, "connection")?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Connection header: {connection}"
        )));
    }
    Ok(())
}

/// Client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub path: String,
    pub host: String,
    pub key: String,
    pub version: u8,
}

impl HandshakeRequest {
    /// Request for `path` on `host` with a fresh key.
    ///
    /// # Errors
    ///
    /// See [`generate_key`].
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            host: host.into(),
            key: generate_key()?,
            version: 13,
        })
    }

    /// Parse a request head (request line and headers).
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the head is not UTF-8, is not a
    /// `GET ... HTTP/1.1` request, or lacks one of `Host`, `Upgrade`,
    /// `Connection`, `Sec-WebSocket-Key`, `Sec-WebSocket-Version`.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;
        let [method, path, version]: [&str; 3] = request_line
            .split_whitespace()
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid request line: {request_line}")))?;
        if method != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {method}"
            )));
        }
        if version != "HTTP/1.1" {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {version}"
            )));
        }

        let headers = parse_headers(
            lines,
            &[
                "host",
                "upgrade",
                "connection",
                "sec-websocket-key",
                "sec-websocket-version",
            ],
        )?;
        check_upgrade_headers(&headers)?;

        let raw_version = require(&headers, "sec-websocket-version")?;
        let version = raw_version
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {raw_version}")))?;

        Ok(Self {
            path: path.to_string(),
            host: require(&headers, "host")?.to_string(),
            key: require(&headers, "sec-websocket-key")?.to_string(),
            version,
        })
    }

    /// Check the RFC 6455 requirements on a parsed request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` unless the version is 13, the key decodes to
    /// 16 bytes, and the host is non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.version != 13 {
            return Err(Error::InvalidHandshake(format!(
                "Unsupported WebSocket version: {} (expected 13)",
                self.version
            )));
        }
        match BASE64.decode(&self.key) {
            Ok(nonce) if nonce.len() == 16 => {}
            Ok(nonce) => {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Key must be 16 bytes, got {}",
                    nonce.len()
                )));
            }
            Err(_) => {
                return Err(Error::InvalidHandshake(
                    "Invalid Sec-WebSocket-Key: not valid Base64".into(),
                ));
            }
        }
        if self.host.is_empty() {
            return Err(Error::InvalidHandshake("Host header cannot be empty".into()));
        }
        Ok(())
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(
            format!(
                "GET {} HTTP/1.1\r\n\
                 Host: {}\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Key: {}\r\n\
                 Sec-WebSocket-Version: {}\r\n\r\n",
                self.path, self.host, self.key, self.version
            )
            .as_bytes(),
        );
    }
}

/// Server `101 Switching Protocols` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub accept: String,
}

impl HandshakeResponse {
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
        }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n\r\n", self.accept).as_bytes());
    }

    /// Parse a response head.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the status is not 101 or the upgrade
    /// headers or `Sec-WebSocket-Accept` are missing.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        if !status_line.starts_with("HTTP/1.1 101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines, &["sec-websocket-accept"])?;
        check_upgrade_headers(&headers)?;
        Ok(Self {
            accept: require(&headers, "sec-websocket-accept")?.to_string(),
        })
    }

    /// Check that the server answered the key we sent.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` on a mismatch.
    pub fn verify(&self, key: &str) -> Result<()> {
        let expected = compute_accept_key(key);
        if self.accept != expected {
            return Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Accept mismatch: expected {expected}, got {}",
                self.accept
            )));
        }
        Ok(())
    }
}

/// Read up to and including the blank line ending an HTTP head.
///
/// Returns the head and any bytes read past it, which already belong to the
/// WebSocket stream.
///
/// # Errors
///
/// - `Error::HandshakeTooLarge` if no blank line arrives within `max` bytes
/// - `Error::InvalidHandshake` if the stream ends first
/// - `Error::Io` on read failure
pub async fn read_head<S>(stream: &mut S, max: usize) -> Result<(BytesMut, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    let mut scanned: usize = 0;
    loop {
        let from = scanned.saturating_sub(HEAD_END.len() - 1);
        if let Some(pos) = buf[from..]
            .windows(HEAD_END.len())
            .position(|window| window == HEAD_END)
        {
            let end = from + pos + HEAD_END.len();
            let leftover = buf.split_off(end);
            return Ok((buf, leftover));
        }
        scanned = buf.len();
        if scanned > max {
            return Err(Error::HandshakeTooLarge {
                size: scanned,
                max,
            });
        }

        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::InvalidHandshake(
                "Stream closed during handshake".into(),
            ));
        }
    }
}

/// Perform the client side of the upgrade.
///
/// Returns bytes the server sent after its response head.
///
/// # Errors
///
/// Any error of [`read_head`] or [`HandshakeResponse::parse`], or a
/// `Sec-WebSocket-Accept` mismatch.
pub async fn client_handshake<S>(
    stream: &mut S,
    host: &str,
    path: &str,
    limits: &Limits,
) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = HandshakeRequest::new(host, path)?;
    let mut out = Vec::with_capacity(256);
    request.write(&mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;

    let (head, leftover) = read_head(stream, limits.max_handshake_size).await?;
    limits.check_handshake_size(head.len())?;
    HandshakeResponse::parse(&head)?.verify(&request.key)?;
    Ok(leftover)
}

/// Perform the server side of the upgrade.
///
/// A rejected request is answered with `400 Bad Request` before the error is
/// returned.
///
/// # Errors
///
/// Any error of [`read_head`], [`HandshakeRequest::parse`] or
/// [`HandshakeRequest::validate`].
pub async fn server_handshake<S>(
    stream: &mut S,
    limits: &Limits,
) -> Result<(HandshakeRequest, BytesMut)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, leftover) = read_head(stream, limits.max_handshake_size).await?;
    let request = match limits
        .check_handshake_size(head.len())
        .and_then(|()| HandshakeRequest::parse(&head))
        .and_then(|req| req.validate().map(|()| req))
    {
        Ok(request) => request,
        Err(e) => {
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n")
                .await;
            return Err(e);
        }
    };

    let mut out = Vec::with_capacity(160);
    HandshakeResponse::from_request(&request).write(&mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok((request, leftover))
}
