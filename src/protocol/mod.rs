//! WebSocket framing (RFC 6455).

pub mod assembler;
pub mod codec;
pub mod frame;
pub mod mask;
pub mod opcode;
pub mod validation;

pub use assembler::MessageAssembler;
pub use codec::{Decoded, FrameCodec};
pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use mask::{MaskGenerator, apply_mask, apply_mask_offset};
pub use opcode::OpCode;
pub use validation::FrameValidator;
