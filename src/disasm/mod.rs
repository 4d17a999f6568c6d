//! Decoder backends.
//!
//! - iced-x86 in 16-bit mode, with fix-up aware operand decoding

pub mod iced;

pub use iced::IcedDecoder;
