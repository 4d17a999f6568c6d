//! Decoder trait and error types for instruction decoding.
//!
//! The flow analysis never looks at raw bytes itself. It asks a [`Decoder`]
//! for the instruction at an image offset and works with the typed result.

use thiserror::Error;

use crate::core::image::ImageChunk;
use crate::core::instruction::Instruction;

/// Errors that can occur while decoding one instruction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The image ends before the instruction does
    #[error("Insufficient bytes at {offset:#x}")]
    InsufficientBytes { offset: usize },

    /// The bytes are not a valid encoding
    #[error("Invalid instruction at {offset:#x}")]
    InvalidInstruction { offset: usize },

    /// A fix-up overlaps the instruction without covering exactly one field
    #[error("Fix-up at {fixup_start:#x} does not match an operand of the instruction at {offset:#x}")]
    BrokenFixup { offset: usize, fixup_start: usize },
}

impl DecodeError {
    /// Image offset of the failing instruction
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::InsufficientBytes { offset }
            | DecodeError::InvalidInstruction { offset }
            | DecodeError::BrokenFixup { offset, .. } => *offset,
        }
    }
}

/// Result type for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Common interface for instruction decoders.
pub trait Decoder {
    /// Decode the instruction at `offset` of `image`, executing at `ip`.
    fn decode(&self, image: &ImageChunk, offset: usize, ip: u16) -> DecodeResult<Instruction>;

    /// Longest encoding the decoder can return
    fn max_instruction_length(&self) -> usize {
        15
    }

    fn name(&self) -> &str {
        "unknown"
    }
}
