//! Splitting outgoing data messages into frames (RFC 6455 Section 5.4).

use bytes::Bytes;

use crate::protocol::{Frame, OpCode};

/// Iterator over the frames of one outgoing data message.
///
/// The first frame carries the message opcode, the rest are continuations;
/// only the last has FIN set. Chunks are zero-copy slices of the payload.
/// An empty payload still yields one final frame.
#[derive(Debug)]
pub struct Fragmenter {
    payload: Bytes,
    opcode: OpCode,
    fragment_size: usize,
    offset: usize,
    started: bool,
}

impl Fragmenter {
    #[must_use]
    pub fn new(payload: Bytes, opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            fragment_size: fragment_size.max(1),
            offset: 0,
            started: false,
        }
    }

    /// Returns `true` if the payload spans more than one frame.
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.payload.len() > self.fragment_size
    }
}

impl Iterator for Fragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.started && self.offset >= self.payload.len() {
            return None;
        }

        let end = (self.offset + self.fragment_size).min(self.payload.len());
        let chunk = self.payload.slice(self.offset..end);
        self.offset = end;

        let opcode = if self.started {
            OpCode::Continuation
        } else {
            self.started = true;
            self.opcode
        };
        Some(Frame::new(end == self.payload.len(), opcode, chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.payload.len() - self.offset;
        let n = if self.started {
            remaining.div_ceil(self.fragment_size)
        } else {
            remaining.div_ceil(self.fragment_size).max(1)
        };
        (n, Some(n))
    }
}
