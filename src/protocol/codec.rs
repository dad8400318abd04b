//! Incremental frame codec.
//!
//! [`FrameCodec`] turns buffered bytes into complete frames and frames into
//! wire bytes. Decoding is resumable: when the buffer ends mid-frame it
//! reports [`Decoded::Incomplete`] and the caller retries once more bytes
//! have arrived.

use bytes::{Buf, Bytes, BytesMut};

use crate::config::Config;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::assembler::MessageAssembler;
use crate::protocol::frame::{Frame, parse_header};
use crate::protocol::mask::MaskGenerator;
use crate::protocol::validation::FrameValidator;

/// Outcome of a decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A control frame or a complete (possibly reassembled) data message.
    Frame(Frame),
    /// More bytes are needed.
    Incomplete,
}

/// Stateful encoder/decoder for one side of a connection.
#[derive(Debug)]
pub struct FrameCodec {
    role: Role,
    validator: FrameValidator,
    assembler: MessageAssembler,
    masks: MaskGenerator,
}

impl FrameCodec {
    pub fn new(role: Role, config: &Config) -> Self {
        Self {
            role,
            validator: FrameValidator::new(role, config.limits)
                .with_accept_unmasked(config.accept_unmasked_frames),
            assembler: MessageAssembler::new(config.limits),
            masks: MaskGenerator::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns `true` while fragments of a data message are buffered.
    pub fn is_reassembling(&self) -> bool {
        self.assembler.is_assembling()
    }

    /// Encode `frame`, masking it with a fresh key when `mask` is set.
    pub fn encode(&mut self, frame: &Frame, mask: bool) -> Bytes {
        let mut dst = BytesMut::with_capacity(frame.wire_size(mask));
        self.encode_into(frame, mask, &mut dst);
        dst.freeze()
    }

    /// Append the encoding of `frame` to `dst`.
    pub fn encode_into(&mut self, frame: &Frame, mask: bool, dst: &mut BytesMut) {
        let key = mask.then(|| self.masks.next_key());
        frame.encode_into(dst, key);
    }

    /// Decode from the front of `buf`.
    ///
    /// Returns the outcome together with the number of bytes consumed.
    /// Fragments absorbed into a pending message count as consumed even when
    /// the result is [`Decoded::Incomplete`], so the caller must always drop
    /// the reported prefix.
    ///
    /// # Errors
    ///
    /// Any framing, validation or reassembly error. The pending message is
    /// discarded and the codec should not be used further.
    pub fn decode(&mut self, buf: &[u8]) -> Result<(Decoded, usize)> {
        let mut consumed = 0;
        loop {
            let rest = &buf[consumed..];
            let header = match parse_header(rest) {
                Ok(header) => header,
                Err(Error::IncompleteFrame { .. }) => return Ok((Decoded::Incomplete, consumed)),
                Err(e) => return Err(self.fail(e)),
            };
            if let Err(e) = self.validator.validate_header(&header) {
                return Err(self.fail(e));
            }

            let total = header.frame_len().map_err(|e| self.fail(e))?;
            if rest.len() < total {
                return Ok((Decoded::Incomplete, consumed));
            }

            let frame = Frame::from_header(&header, &rest[header.header_len..total]);
            consumed += total;

            match self.assembler.push(frame) {
                Ok(Some(frame)) => return Ok((Decoded::Frame(frame), consumed)),
                Ok(None) => {}
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Decode from `buf`, advancing it past consumed bytes.
    ///
    /// # Errors
    ///
    /// See [`FrameCodec::decode`].
    pub fn decode_buf(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        let (decoded, consumed) = self.decode(buf)?;
        buf.advance(consumed);
        Ok(match decoded {
            Decoded::Frame(frame) => Some(frame),
            Decoded::Incomplete => None,
        })
    }

    fn fail(&mut self, error: Error) -> Error {
        self.assembler.reset();
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::protocol::OpCode;

    fn pair() -> (FrameCodec, FrameCodec) {
        (
            FrameCodec::new(Role::Client, &Config::client()),
            FrameCodec::new(Role::Server, &Config::server()),
        )
    }

    #[test]
    fn test_client_to_server_roundtrip() {
        let (mut client, mut server) = pair();
        let wire = client.encode(&Frame::text("Hello"), true);
        assert_eq!(wire[1] & 0x80, 0x80);

        let (decoded, consumed) = server.decode(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(decoded, Decoded::Frame(Frame::text("Hello")));
    }

    #[test]
    fn test_server_to_client_roundtrip() {
        let (mut client, mut server) = pair();
        let wire = server.encode(&Frame::binary(vec![1u8, 2, 3]), false);
        let (decoded, _) = client.decode(&wire).unwrap();
        assert_eq!(decoded, Decoded::Frame(Frame::binary(vec![1u8, 2, 3])));
    }

    #[test]
    fn test_incomplete_then_complete() {
        let (mut client, mut server) = pair();
        let wire = client.encode(&Frame::binary(vec![7u8; 300]), true);

        for cut in [0, 1, 2, 4, 8, wire.len() - 1] {
            let (decoded, consumed) = server.decode(&wire[..cut]).unwrap();
            assert_eq!(decoded, Decoded::Incomplete);
            assert_eq!(consumed, 0);
        }
        let (decoded, consumed) = server.decode(&wire).unwrap();
        assert!(matches!(decoded, Decoded::Frame(f) if f.len() == 300));
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn test_reassembles_with_interleaved_ping() {
        let mut server = FrameCodec::new(Role::Server, &Config::server());
        let mut client = FrameCodec::new(Role::Client, &Config::client());

        let mut wire = BytesMut::new();
        client.encode_into(&Frame::new(false, OpCode::Text, "Hel"), true, &mut wire);
        client.encode_into(&Frame::ping("p"), true, &mut wire);
        client.encode_into(&Frame::continuation(true, "lo"), true, &mut wire);

        let ping = server.decode_buf(&mut wire).unwrap().unwrap();
        assert_eq!(ping.opcode, OpCode::Ping);
        assert!(server.is_reassembling());

        let msg = server.decode_buf(&mut wire).unwrap().unwrap();
        assert_eq!(msg.opcode, OpCode::Text);
        assert_eq!(msg.payload(), b"Hello");
        assert!(wire.is_empty());
        assert!(!server.is_reassembling());
    }

    #[test]
    fn test_absorbed_fragments_count_as_consumed() {
        let (mut client, mut server) = pair();
        let mut wire = BytesMut::new();
        client.encode_into(&Frame::new(false, OpCode::Binary, vec![1u8]), true, &mut wire);
        let first_len = wire.len();
        client.encode_into(&Frame::continuation(true, vec![2u8]), true, &mut wire);

        let (decoded, consumed) = server.decode(&wire[..first_len + 1]).unwrap();
        assert_eq!(decoded, Decoded::Incomplete);
        assert_eq!(consumed, first_len);

        let (decoded, _) = server.decode(&wire[first_len..]).unwrap();
        assert!(matches!(decoded, Decoded::Frame(f) if f.payload() == [1, 2]));
    }

    #[test]
    fn test_server_rejects_unmasked() {
        let (_, mut server) = pair();
        let mut other = FrameCodec::new(Role::Server, &Config::server());
        let wire = other.encode(&Frame::text("x"), false);
        assert!(matches!(
            server.decode(&wire),
            Err(Error::UnmaskedClientFrame)
        ));
    }

    #[test]
    fn test_client_rejects_masked() {
        let (mut client, _) = pair();
        let mut other = FrameCodec::new(Role::Client, &Config::client());
        let wire = other.encode(&Frame::text("x"), true);
        assert!(matches!(client.decode(&wire), Err(Error::MaskedServerFrame)));
    }

    #[test]
    fn test_oversized_frame_rejected_from_header() {
        let config = Config::client().with_limits(Limits::new(16, 64, 4, 4096));
        let mut client = FrameCodec::new(Role::Client, &config);
        // Header only: the payload never needs to arrive.
        let wire = [0x82, 0x7e, 0x01, 0x00];
        assert!(matches!(
            client.decode(&wire),
            Err(Error::FrameTooLarge { size: 256, max: 16 })
        ));
    }

    #[test]
    fn test_error_discards_pending_message() {
        let (mut client, mut server) = pair();
        let mut wire = BytesMut::new();
        client.encode_into(&Frame::new(false, OpCode::Text, "a"), true, &mut wire);
        client.encode_into(&Frame::text("b"), true, &mut wire);
        assert!(matches!(
            server.decode_buf(&mut wire),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(!server.is_reassembling());
    }
}
