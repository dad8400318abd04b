//! Reassembly of fragmented messages (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode};

/// Collects an initial data frame and its continuations into one message.
///
/// Control frames pass straight through, so they may be interleaved
/// between the fragments of a data message.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    opcode: Option<OpCode>,
    fragment_count: usize,
    limits: Limits,
}

impl MessageAssembler {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            opcode: None,
            fragment_count: 0,
            limits,
        }
    }

    /// Feed one frame.
    ///
    /// Returns `Some(frame)` when a control frame arrives or a data message
    /// completes; the completed frame has `fin = true`, the opcode of the
    /// initial fragment and the concatenated payload.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with no message in
    ///   progress, or a new data frame while one is in progress
    /// - `Error::TooManyFragments` / `Error::MessageTooLarge` on limit breaches
    /// - `Error::InvalidUtf8` if a completed text message is not UTF-8
    pub fn push(&mut self, frame: Frame) -> Result<Option<Frame>> {
        if frame.opcode.is_control() {
            return Ok(Some(frame));
        }

        match (frame.opcode, self.opcode) {
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "Continuation frame without initial fragment".into(),
                ));
            }
            (OpCode::Continuation, Some(_)) => {}
            (_, Some(pending)) => {
                return Err(Error::ProtocolViolation(format!(
                    "Expected continuation frame, got {} while assembling {}",
                    frame.opcode, pending
                )));
            }
            (opcode, None) if frame.fin => {
                // Unfragmented message: no copy needed.
                self.limits.check_message_size(frame.len())?;
                if opcode == OpCode::Text {
                    std::str::from_utf8(frame.payload())?;
                }
                return Ok(Some(frame));
            }
            (opcode, None) => self.opcode = Some(opcode),
        }

        self.fragment_count += 1;
        self.limits.check_fragment_count(self.fragment_count)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.len())?;
        self.buffer.extend_from_slice(frame.payload());

        if !frame.fin {
            return Ok(None);
        }

        let opcode = self.opcode.take().unwrap_or(OpCode::Binary);
        let payload = self.buffer.split().freeze();
        self.fragment_count = 0;
        if opcode == OpCode::Text {
            std::str::from_utf8(&payload)?;
        }
        Ok(Some(Frame::new(true, opcode, payload)))
    }

    /// Returns `true` while a fragmented message is in progress.
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Drop any partially assembled message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.opcode = None;
        self.fragment_count = 0;
    }
}
