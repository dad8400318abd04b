use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::Poll;

use bytes::{Buf, BytesMut};
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::close::{CloseCode, CloseFrame};
use crate::config::Config;
use crate::connection::fragmenter::Fragmenter;
use crate::connection::{ConnectionId, ConnectionState, Role};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{Frame, FrameCodec, OpCode};

/// One upgraded WebSocket stream plus its codec and close state machine.
///
/// A `Connection` is created in the `Open` state: the HTTP upgrade is done by
/// the transport before the stream is handed over. Pings are answered
/// internally and pongs are swallowed, so [`receive`](Self::receive) only
/// ever yields data messages.
///
/// ```rust,ignore
/// let mut conn = Connection::new(ConnectionId::new(1), stream, Role::Client, Config::client());
/// conn.send(Frame::text("hello")).await?;
/// while let Some(frame) = conn.receive().await? {
///     println!("{} bytes", frame.len());
/// }
/// conn.close(CloseCode::Normal, "done").await?;
/// ```
pub struct Connection<S> {
    id: ConnectionId,
    io: S,
    role: Role,
    codec: FrameCodec,
    config: Config,
    state: ConnectionState,
    read_buf: BytesMut,
    write_buf: BytesMut,
    peer_close: Option<CloseFrame>,
    close_sent: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("buffered", &self.read_buf.len())
            .finish_non_exhaustive()
    }
}

impl<S> Connection<S> {
    /// Wrap an upgraded stream.
    pub fn new(id: ConnectionId, io: S, role: Role, config: Config) -> Self {
        Self::with_buffered(id, io, role, config, BytesMut::new())
    }

    /// Wrap an upgraded stream, seeding the read buffer with bytes that
    /// arrived together with the handshake.
    pub fn with_buffered(
        id: ConnectionId,
        io: S,
        role: Role,
        config: Config,
        leftover: BytesMut,
    ) -> Self {
        let mut read_buf = BytesMut::with_capacity(config.read_buffer_size.max(leftover.len()));
        read_buf.extend_from_slice(&leftover);
        Self {
            id,
            io,
            role,
            codec: FrameCodec::new(role, &config),
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
            config,
            state: ConnectionState::Open,
            read_buf,
            peer_close: None,
            close_sent: false,
            cancel: None,
        }
    }

    /// Abort pending receives and blocked writes with `Error::Cancelled` once
    /// `cancel` turns `true`. A write aborted half way leaves the connection
    /// `Closed`.
    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Status the peer sent in its close frame, if any.
    pub fn peer_close(&self) -> Option<&CloseFrame> {
        self.peer_close.as_ref()
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.io
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "{} -> {}",
            self.state,
            next
        );
        debug!(conn = %self.id, from = %self.state, to = %next, "state change");
        self.state = next;
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Send one data or control frame.
    ///
    /// Final data frames larger than `fragment_size` are split into an
    /// initial frame and continuations, never more than `max_fragment_count`
    /// of them. Frames the peer sends while the write is blocked are
    /// buffered for the next [`receive`](Self::receive).
    ///
    /// Dropping the returned future does not tear the stream: the encoded
    /// remainder is written ahead of the next frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` unless the connection is `Open`
    /// - `Error::MessageTooLarge` if the payload exceeds `max_message_size`
    /// - `Error::FragmentedControlFrame` / `Error::ControlFrameTooLarge`
    /// - `Error::Io` on write failure; the connection is then `Closed`
    /// - `Error::Cancelled` if the cancellation signal fires while the write
    ///   is blocked; the connection is then `Closed`
    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed(self.peer_close_code()));
        }
        frame.validate()?;
        self.config.limits.check_message_size(frame.len())?;
        if frame.opcode == OpCode::Close {
            self.close_sent = true;
            self.set_state(ConnectionState::Closing);
        }

        let fragment_size = self.fragment_size_for(frame.len());
        let result = if frame.is_control() || !frame.fin || frame.len() <= fragment_size {
            self.write_frames(std::iter::once(frame)).await
        } else {
            let opcode = frame.opcode;
            let fragments = Fragmenter::new(frame.into_payload(), opcode, fragment_size);
            self.write_frames(fragments).await
        };
        result.map_err(|e| self.transport_failed(e))
    }

    /// Configured fragment size, grown so that a `len`-byte message needs at
    /// most `max_fragment_count` frames.
    fn fragment_size_for(&self, len: usize) -> usize {
        let max_fragments = self.config.limits.max_fragment_count.max(1);
        self.config.fragment_size.max(len.div_ceil(max_fragments)).max(1)
    }

    /// Wait for the next data message.
    ///
    /// Returns `Ok(None)` once the connection is closed, whether by the peer's
    /// close frame, end of stream, or an earlier close.
    ///
    /// # Errors
    ///
    /// - protocol errors; a close frame with a matching code is sent and the
    ///   connection is `Closed`
    /// - `Error::Io` on read failure; the connection is `Closed`
    /// - `Error::Cancelled` if the cancellation signal fires; the connection
    ///   is left as it was unless an earlier write was still unfinished
    pub async fn receive(&mut self) -> Result<Option<Frame>> {
        loop {
            if !self.state.can_receive() {
                return Ok(None);
            }

            let frame = match self.codec.decode_buf(&mut self.read_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    // A dropped send may have left output behind that the
                    // peer needs before it can answer.
                    if !self.write_buf.is_empty() {
                        if let Err(e) = self.write_frames(std::iter::empty()).await {
                            return Err(self.transport_failed(e));
                        }
                        continue;
                    }
                    if self.fill_read_buf().await? == 0 {
                        if !self.read_buf.is_empty() || self.codec.is_reassembling() {
                            warn!(conn = %self.id, buffered = self.read_buf.len(), "stream ended mid-message");
                        } else {
                            debug!(conn = %self.id, "stream ended without close frame");
                        }
                        self.set_state(ConnectionState::Closed);
                        return Ok(None);
                    }
                    continue;
                }
                Err(e) => return Err(self.protocol_failed(e).await),
            };

            match frame.opcode {
                OpCode::Ping => {
                    if !self.close_sent {
                        let pong = Frame::pong(frame.into_payload());
                        if let Err(e) = self.write_frames(std::iter::once(pong)).await {
                            return Err(self.transport_failed(e));
                        }
                    }
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    self.on_peer_close(&frame).await?;
                    return Ok(None);
                }
                _ => return Ok(Some(frame)),
            }
        }
    }

    /// Return a data message if one can be produced without waiting.
    ///
    /// `Ok(None)` means nothing is ready yet or the connection is closed;
    /// check [`state`](Self::state) to tell them apart.
    ///
    /// # Errors
    ///
    /// Same as [`receive`](Self::receive).
    pub fn try_receive(&mut self) -> Result<Option<Frame>> {
        self.receive().now_or_never().unwrap_or(Ok(None))
    }

    /// Start the close handshake and wait for the peer's close frame.
    ///
    /// Waits at most `close_grace`; after that the stream is shut down
    /// regardless. Calling this on a connection that is not `Open` does
    /// nothing.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for reserved codes
    /// - `Error::Io` if the close frame cannot be written; the connection is
    ///   `Closed` anyway
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Ok(());
        }
        if code.is_reserved() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }

        self.close_sent = true;
        self.set_state(ConnectionState::Closing);

        // The handshake must finish even while a pool shutdown is signalled.
        let cancel = self.cancel.take();
        let frame = Frame::close(Some(code), reason);
        if let Err(e) = self.write_frames(std::iter::once(frame)).await {
            self.cancel = cancel;
            let err = self.transport_failed(e);
            self.set_state(ConnectionState::Closed);
            self.shutdown_io().await;
            return Err(err);
        }

        let grace = self.config.timeouts.close_grace;
        if tokio::time::timeout(grace, self.drain_until_close())
            .await
            .is_err()
        {
            warn!(conn = %self.id, ?grace, "peer did not answer close, forcing");
        }
        self.cancel = cancel;

        self.set_state(ConnectionState::Closed);
        self.shutdown_io().await;
        Ok(())
    }

    /// Drop to `Closed` immediately without a close handshake.
    pub async fn force_close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        warn!(conn = %self.id, state = %self.state, "force closing");
        self.set_state(ConnectionState::Closed);
        self.shutdown_io().await;
    }

    async fn drain_until_close(&mut self) {
        loop {
            match self.receive().await {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return,
            }
        }
    }

    async fn on_peer_close(&mut self, frame: &Frame) -> Result<()> {
        let close = match frame.close_frame() {
            Ok(close) => close,
            Err(e) => return Err(self.protocol_failed(e).await),
        };
        if let Some(code) = close.as_ref().map(|c| c.code) {
            if code.is_reserved() || code.as_u16() < 1000 {
                return Err(self.protocol_failed(Error::InvalidCloseCode(code.as_u16())).await);
            }
        }
        debug!(conn = %self.id, code = ?close.as_ref().map(|c| c.code.as_u16()), "peer closed");

        if !self.close_sent {
            self.close_sent = true;
            self.set_state(ConnectionState::Closing);
            let reply = Frame::close(close.as_ref().map(|c| c.code), "");
            if let Err(e) = self.write_frames(std::iter::once(reply)).await {
                debug!(conn = %self.id, error = %e, "close reply not delivered");
            }
        }
        self.peer_close = close;
        self.set_state(ConnectionState::Closed);
        self.shutdown_io().await;
        Ok(())
    }

    async fn fill_read_buf(&mut self) -> Result<usize> {
        self.read_buf.reserve(self.config.read_buffer_size);
        let read = self.io.read_buf(&mut self.read_buf);
        let result = match self.cancel.as_mut() {
            Some(cancel) => tokio::select! {
                result = read => result,
                () = cancelled(cancel) => return Err(Error::Cancelled),
            },
            None => read.await,
        };
        result.map_err(|e| self.transport_failed(e.into()))
    }

    /// Encode `frames` behind any unwritten output and write it all out.
    ///
    /// Output stays in `write_buf` until the stream accepts it, so a dropped
    /// call leaves whole frames for the next one to finish.
    async fn write_frames(&mut self, frames: impl IntoIterator<Item = Frame>) -> Result<()> {
        let mask = self.role.must_mask();
        for frame in frames {
            self.codec.encode_into(&frame, mask, &mut self.write_buf);
        }

        let inbound_cap = self
            .config
            .limits
            .max_message_size
            .saturating_add(self.config.read_buffer_size);
        let writing = write_draining(
            &mut self.io,
            &mut self.write_buf,
            &mut self.read_buf,
            inbound_cap,
        );
        let result = match self.cancel.as_mut() {
            Some(cancel) => tokio::select! {
                biased;
                result = writing => result.map_err(Error::from),
                () = cancelled(cancel) => Err(Error::Cancelled),
            },
            None => writing.await.map_err(Error::from),
        };

        if let Err(Error::Cancelled) = result {
            warn!(conn = %self.id, unwritten = self.write_buf.len(), "write cancelled, closing");
            self.write_buf.clear();
            self.set_state(ConnectionState::Closed);
            self.shutdown_io().await;
        }
        result
    }

    async fn protocol_failed(&mut self, error: Error) -> Error {
        warn!(conn = %self.id, %error, "protocol error");
        if error.kind() == ErrorKind::Protocol && !self.close_sent && self.state.can_send() {
            self.close_sent = true;
            let frame = Frame::close(Some(CloseCode::for_error(&error)), "");
            let _ = self.write_frames(std::iter::once(frame)).await;
        }
        self.set_state(ConnectionState::Closed);
        self.shutdown_io().await;
        error
    }

    fn transport_failed(&mut self, error: Error) -> Error {
        if error.is_fatal() {
            warn!(conn = %self.id, %error, "transport error");
            self.set_state(ConnectionState::Closed);
        }
        error
    }

    async fn shutdown_io(&mut self) {
        if let Err(e) = self.io.shutdown().await {
            debug!(conn = %self.id, error = %e, "shutdown failed");
        }
    }

    fn peer_close_code(&self) -> Option<u16> {
        self.peer_close.as_ref().map(|c| c.code.as_u16())
    }
}

/// Write all of `out` to `stream`, reading into `inbound` whenever the write
/// would block.
///
/// A peer that echoes everything stops reading once its own writes back up,
/// so a writer that never reads would wait on it forever.
async fn write_draining<S>(
    stream: &mut S,
    out: &mut BytesMut,
    inbound: &mut BytesMut,
    inbound_cap: usize,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut readable = true;
    poll_fn(|cx| {
        loop {
            if out.is_empty() {
                return Pin::new(&mut *stream).poll_flush(cx);
            }
            match Pin::new(&mut *stream).poll_write(cx, &out[..]) {
                Poll::Ready(Ok(0)) => return Poll::Ready(Err(io::ErrorKind::WriteZero.into())),
                Poll::Ready(Ok(n)) => {
                    out.advance(n);
                    continue;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }

            if !readable || inbound.len() >= inbound_cap {
                return Poll::Pending;
            }
            let mut chunk = [0u8; 8 * 1024];
            let mut buf = ReadBuf::new(&mut chunk);
            match Pin::new(&mut *stream).poll_read(cx, &mut buf) {
                Poll::Ready(Ok(())) if buf.filled().is_empty() => {
                    // End of stream; `receive` reports it.
                    readable = false;
                    return Poll::Pending;
                }
                Poll::Ready(Ok(())) => inbound.extend_from_slice(buf.filled()),
                Poll::Ready(Err(_)) => {
                    readable = false;
                    return Poll::Pending;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    })
    .await
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender gone without signalling: never cancelled.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::task::Context;
    use std::time::Duration;

    use crate::config::Limits;

    struct MockStream {
        read_data: Cursor<Vec<u8>>,
        write_data: Vec<u8>,
    }

    impl MockStream {
        fn new(data: Vec<u8>) -> Self {
            Self {
                read_data: Cursor::new(data),
                write_data: Vec::new(),
            }
        }

        fn written(&self) -> &[u8] {
            &self.write_data
        }
    }

    impl AsyncRead for MockStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let pos = self.read_data.position() as usize;
            let data = self.read_data.get_ref();
            if pos >= data.len() {
                return Poll::Ready(Ok(()));
            }
            let remaining = &data[pos..];
            let to_copy = std::cmp::min(remaining.len(), buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            self.read_data.set_position((pos + to_copy) as u64);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.write_data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn server(data: Vec<u8>) -> Connection<MockStream> {
        Connection::new(
            ConnectionId::new(1),
            MockStream::new(data),
            Role::Server,
            Config::server(),
        )
    }

    #[test]
    fn test_connection_starts_open() {
        let conn = server(vec![]);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.is_open());
        assert_eq!(conn.id(), ConnectionId::new(1));
    }

    #[tokio::test]
    async fn test_send_text_unmasked_from_server() {
        let mut conn = server(vec![]);
        conn.send(Frame::text("Hello")).await.unwrap();

        let written = conn.into_inner().written().to_vec();
        assert_eq!(written, vec![0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn test_send_masked_from_client() {
        let mut conn = Connection::new(
            ConnectionId::new(2),
            MockStream::new(vec![]),
            Role::Client,
            Config::client(),
        );
        conn.send(Frame::binary(vec![1u8, 2, 3])).await.unwrap();

        let written = conn.into_inner().written().to_vec();
        assert_eq!(written[0], 0x82);
        assert_eq!(written[1], 0x80 | 3);
        assert_eq!(written.len(), 2 + 4 + 3);
    }

    #[tokio::test]
    async fn test_send_fragments_large_payload() {
        let config = Config::server().with_fragment_size(4);
        let mut conn = Connection::new(
            ConnectionId::new(1),
            MockStream::new(vec![]),
            Role::Server,
            config,
        );
        conn.send(Frame::binary(vec![9u8; 10])).await.unwrap();

        let written = conn.into_inner().written().to_vec();
        assert_eq!(&written[..2], &[0x02, 0x04]);
        assert_eq!(&written[6..8], &[0x00, 0x04]);
        assert_eq!(&written[12..14], &[0x80, 0x02]);
        assert_eq!(written.len(), 3 * 2 + 10);
    }

    #[tokio::test]
    async fn test_send_keeps_fragment_count_within_limit() {
        let limits = Limits {
            max_fragment_count: 2,
            ..Limits::default()
        };
        let config = Config::server().with_fragment_size(4).with_limits(limits);
        let mut conn = Connection::new(
            ConnectionId::new(1),
            MockStream::new(vec![]),
            Role::Server,
            config,
        );
        conn.send(Frame::binary(vec![9u8; 10])).await.unwrap();

        let written = conn.into_inner().written().to_vec();
        assert_eq!(&written[..2], &[0x02, 0x05]);
        assert_eq!(&written[7..9], &[0x80, 0x05]);
        assert_eq!(written.len(), 2 * 2 + 10);
    }

    #[tokio::test]
    async fn test_send_rejects_oversize_unfragmented_message() {
        let limits = Limits {
            max_message_size: 8,
            ..Limits::default()
        };
        let mut conn = Connection::new(
            ConnectionId::new(1),
            MockStream::new(vec![]),
            Role::Server,
            Config::server().with_limits(limits),
        );
        assert!(matches!(
            conn.send(Frame::binary(vec![0u8; 10])).await,
            Err(Error::MessageTooLarge { size: 10, max: 8 })
        ));
        assert!(conn.is_open());
        assert!(conn.into_inner().written().is_empty());
    }

    #[tokio::test]
    async fn test_send_reads_while_peer_echoes() {
        let (a, b) = tokio::io::duplex(64);
        let mut client = Connection::new(ConnectionId::new(1), a, Role::Client, Config::client());
        let mut server = Connection::new(ConnectionId::new(2), b, Role::Server, Config::server());
        tokio::spawn(async move {
            while let Ok(Some(frame)) = server.receive().await {
                if server.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let exchange = async {
            for i in 0..10u8 {
                client.send(Frame::binary(vec![i; 64 * 1024])).await.unwrap();
            }
            for i in 0..10u8 {
                let frame = client.receive().await.unwrap().unwrap();
                assert_eq!(frame.len(), 64 * 1024);
                assert!(frame.payload().iter().all(|&b| b == i));
            }
        };
        tokio::time::timeout(Duration::from_secs(10), exchange)
            .await
            .expect("both writers stalled");
    }

    #[tokio::test]
    async fn test_dropped_send_does_not_tear_frame() {
        let (a, b) = tokio::io::duplex(1024);
        let mut client = Connection::new(ConnectionId::new(1), a, Role::Client, Config::client());
        let mut server = Connection::new(ConnectionId::new(2), b, Role::Server, Config::server());

        let blocked = client.send(Frame::binary(vec![7u8; 64 * 1024]));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), blocked)
                .await
                .is_err()
        );

        let peer = tokio::spawn(async move {
            let frame = server.receive().await.unwrap().unwrap();
            assert_eq!(frame.len(), 64 * 1024);
            assert!(server.receive().await.unwrap().is_none());
            server.peer_close().cloned()
        });
        client.close(CloseCode::GoingAway, "").await.unwrap();

        let seen = peer.await.unwrap().unwrap();
        assert_eq!(seen.code, CloseCode::GoingAway);
    }

    #[tokio::test]
    async fn test_cancel_aborts_blocked_send() {
        let (a, _b) = tokio::io::duplex(1024);
        let (tx, rx) = watch::channel(false);
        let mut conn =
            Connection::new(ConnectionId::new(1), a, Role::Client, Config::client()).with_cancel(rx);

        let pending = tokio::spawn(async move {
            let result = conn.send(Frame::binary(vec![0u8; 64 * 1024])).await;
            (result, conn.state())
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        let (result, state) = pending.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_receive_masked_text() {
        let data = vec![
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let mut conn = server(data);
        let frame = conn.receive().await.unwrap().unwrap();
        assert_eq!(frame, Frame::text("Hello"));
    }

    #[tokio::test]
    async fn test_ping_answered_and_not_surfaced() {
        let mut data = vec![0x89, 0x84, 0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(b"ping");
        data.extend_from_slice(&[0x82, 0x81, 0x00, 0x00, 0x00, 0x00, 0x07]);
        let mut conn = server(data);

        let frame = conn.receive().await.unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload(), &[7]);

        let written = conn.into_inner().written().to_vec();
        assert_eq!(written, vec![0x8a, 0x04, b'p', b'i', b'n', b'g']);
    }

    #[tokio::test]
    async fn test_unsolicited_pong_discarded() {
        let mut data = vec![0x8a, 0x84, 0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(b"pong");
        let mut conn = server(data);

        assert!(conn.receive().await.unwrap().is_none());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.into_inner().written().is_empty());
    }

    #[tokio::test]
    async fn test_peer_close_is_echoed() {
        let data = vec![0x88, 0x82, 0x00, 0x00, 0x00, 0x00, 0x03, 0xe8];
        let mut conn = server(data);

        assert!(conn.receive().await.unwrap().is_none());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.peer_close().unwrap().code, CloseCode::Normal);

        let written = conn.into_inner().written().to_vec();
        assert_eq!(written, vec![0x88, 0x02, 0x03, 0xe8]);
    }

    #[tokio::test]
    async fn test_receive_after_close_returns_none() {
        let data = vec![0x88, 0x80, 0x00, 0x00, 0x00, 0x00];
        let mut conn = server(data);
        assert!(conn.receive().await.unwrap().is_none());
        assert!(conn.receive().await.unwrap().is_none());
        assert!(matches!(
            conn.send(Frame::text("late")).await,
            Err(Error::ConnectionClosed(None))
        ));
    }

    #[tokio::test]
    async fn test_protocol_error_closes_with_code() {
        // Unmasked frame sent to a server.
        let mut conn = server(vec![0x81, 0x01, b'x']);
        assert!(matches!(
            conn.receive().await,
            Err(Error::UnmaskedClientFrame)
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);

        let written = conn.into_inner().written().to_vec();
        assert_eq!(written, vec![0x88, 0x02, 0x03, 0xea]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let config = Config::server().with_close_grace(Duration::from_millis(50));
        let mut conn = Connection::new(
            ConnectionId::new(1),
            MockStream::new(vec![]),
            Role::Server,
            config,
        );

        conn.close(CloseCode::Normal, "bye").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close(CloseCode::Normal, "again").await.unwrap();

        let written = conn.into_inner().written().to_vec();
        assert_eq!(written[0], 0x88);
        assert_eq!(written.len(), 2 + 2 + 3);
    }

    #[tokio::test]
    async fn test_close_rejects_reserved_code() {
        let mut conn = server(vec![]);
        assert!(matches!(
            conn.close(CloseCode::Other(1006), "").await,
            Err(Error::InvalidCloseCode(1006))
        ));
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_close_handshake_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut client = Connection::new(ConnectionId::new(1), a, Role::Client, Config::client());
        let mut server = Connection::new(ConnectionId::new(2), b, Role::Server, Config::server());

        let peer = tokio::spawn(async move {
            let frame = server.receive().await.unwrap().unwrap();
            server.send(frame).await.unwrap();
            assert!(server.receive().await.unwrap().is_none());
            server.peer_close().cloned()
        });

        client.send(Frame::text("echo")).await.unwrap();
        assert_eq!(client.receive().await.unwrap().unwrap().payload(), b"echo");
        client.close(CloseCode::Normal, "done").await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);

        let seen = peer.await.unwrap().unwrap();
        assert_eq!(seen.code, CloseCode::Normal);
        assert_eq!(seen.reason, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_forced_after_grace() {
        let (a, _b) = tokio::io::duplex(1024);
        let config = Config::client().with_close_grace(Duration::from_secs(2));
        let mut conn = Connection::new(ConnectionId::new(1), a, Role::Client, config);

        conn.close(CloseCode::Normal, "").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_receive() {
        let (a, _b) = tokio::io::duplex(1024);
        let (tx, rx) = watch::channel(false);
        let mut conn =
            Connection::new(ConnectionId::new(1), a, Role::Client, Config::client()).with_cancel(rx);

        let pending = tokio::spawn(async move { conn.receive().await });
        tx.send(true).unwrap();
        assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_try_receive_does_not_block() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut conn = Connection::new(ConnectionId::new(1), a, Role::Client, Config::client());
        assert!(conn.try_receive().unwrap().is_none());
        assert!(conn.is_open());

        b.write_all(&[0x82, 0x01, 0x05]).await.unwrap();
        tokio::task::yield_now().await;
        let frame = conn.try_receive().unwrap().unwrap();
        assert_eq!(frame.payload(), &[5]);
    }
}
