//! WebSocket frame parsing and serialization (RFC 6455 Section 5.2).

use bytes::{BufMut, Bytes, BytesMut};

use crate::close::{CloseCode, CloseFrame};
use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded fixed part of a frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) fin: bool,
    /// RSV1-3 as the high nibble of the first byte, shifted down.
    pub(crate) rsv: u8,
    pub(crate) opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload_len: usize,
    pub(crate) header_len: usize,
}

impl FrameHeader {
    /// Header plus payload length.
    pub(crate) fn frame_len(&self) -> Result<usize> {
        self.header_len
            .checked_add(self.payload_len)
            .ok_or(Error::PayloadTooLargeForPlatform {
                size: self.payload_len as u64,
                max: usize::MAX as u64,
            })
    }
}

/// Parse a frame header from the front of `buf`.
///
/// # Errors
///
/// - `Error::IncompleteFrame` if the header is not fully buffered
/// - `Error::ReservedOpcode` / `Error::InvalidOpcode` for bad opcodes
/// - `Error::PayloadTooLargeForPlatform` if a 64-bit length does not fit `usize`
pub(crate) fn parse_header(buf: &[u8]) -> Result<FrameHeader> {
    let &[byte0, byte1, ..] = buf else {
        return Err(Error::IncompleteFrame {
            needed: 2 - buf.len(),
        });
    };

    let fin = byte0 & 0x80 != 0;
    let rsv = (byte0 >> 4) & 0x07;
    let opcode = OpCode::from_u8(byte0 & 0x0F)?;
    let masked = byte1 & 0x80 != 0;

    let (payload_len, len_end) = match byte1 & 0x7F {
        126 => {
            let Some(ext) = buf.get(2..4) else {
                return Err(Error::IncompleteFrame {
                    needed: 4 - buf.len(),
                });
            };
            (u16::from_be_bytes([ext[0], ext[1]]) as usize, 4)
        }
        127 => {
            let Some(ext) = buf.get(2..10) else {
                return Err(Error::IncompleteFrame {
                    needed: 10 - buf.len(),
                });
            };
            let mut raw = [0u8; 8];
            raw.copy_from_slice(ext);
            let len = u64::from_be_bytes(raw);
            if len >> 63 != 0 {
                return Err(Error::InvalidFrame(
                    "most significant bit of 64-bit length is set".into(),
                ));
            }
            let len = usize::try_from(len).map_err(|_| Error::PayloadTooLargeForPlatform {
                size: len,
                max: usize::MAX as u64,
            })?;
            (len, 10)
        }
        short => (short as usize, 2),
    };

    let mask = if masked {
        let Some(key) = buf.get(len_end..len_end + 4) else {
            return Err(Error::IncompleteFrame {
                needed: len_end + 4 - buf.len(),
            });
        };
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    Ok(FrameHeader {
        fin,
        rsv,
        opcode,
        mask,
        payload_len,
        header_len: if masked { len_end + 4 } else { len_end },
    })
}

/// A single WebSocket frame, or a reassembled message delivered as one frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                Masking key (if MASK set)                      |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Final text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Continuation frame.
    #[must_use]
    pub fn continuation(fin: bool, data: impl Into<Bytes>) -> Self {
        Self::new(fin, OpCode::Continuation, data)
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Close frame with an optional status code and reason.
    #[must_use]
    pub fn close(code: Option<CloseCode>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => CloseFrame::new(code, reason).to_payload(),
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Shared handle to the payload.
    #[inline]
    #[must_use]
    pub fn payload_bytes(&self) -> &Bytes {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns `true` for close, ping and pong frames.
    #[inline]
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Status carried by a close frame.
    ///
    /// # Errors
    ///
    /// See [`CloseFrame::parse`].
    pub fn close_frame(&self) -> Result<Option<CloseFrame>> {
        if self.opcode != OpCode::Close {
            return Ok(None);
        }
        CloseFrame::parse(&self.payload)
    }

    /// Check control-frame rules.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Parse one complete frame from the front of `buf`.
    ///
    /// Masked payloads are unmasked. No fragmentation or role checks are
    /// applied; see [`FrameCodec`](crate::protocol::FrameCodec) for those.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::ReservedOpcode` / `Error::InvalidOpcode` for bad opcodes
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = parse_header(buf)?;
        let total = header.frame_len()?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }
        let frame = Self::from_header(&header, &buf[header.header_len..total]);
        Ok((frame, total))
    }

    pub(crate) fn from_header(header: &FrameHeader, raw_payload: &[u8]) -> Self {
        let payload = match header.mask {
            Some(mask) => {
                let mut data = BytesMut::from(raw_payload);
                apply_mask(&mut data, mask);
                data.freeze()
            }
            None => Bytes::copy_from_slice(raw_payload),
        };
        Self {
            fin: header.fin,
            opcode: header.opcode,
            payload,
        }
    }

    /// Number of bytes this frame occupies on the wire.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let extended = match len {
            0..=125 => 0,
            126..=65535 => 2,
            _ => 8,
        };
        2 + extended + if masked { 4 } else { 0 } + len
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        let len = self.payload.len();
        dst.reserve(self.wire_size(mask.is_some()));

        let fin = if self.fin { 0x80 } else { 0 };
        dst.put_u8(fin | self.opcode.as_u8());

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        match len {
            0..=125 => dst.put_u8(mask_bit | len as u8),
            126..=65535 => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }
}
