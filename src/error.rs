//! Error types for the dosflow analysis engine.
//!
//! These are precondition failures reported to the caller of a mutating
//! operation. Findings made while analyzing code are not errors in this sense;
//! they are accumulated as [`crate::core::diagnostics::Diagnostic`] records.

use thiserror::Error;

/// Main error type for dosflow operations.
#[derive(Debug, Error)]
pub enum DosflowError {
    /// Checked displacement arithmetic left the 16-bit range
    #[error("Address wrapped: {offset:#06x} {delta:+}")]
    AddressWrapped { offset: u16, delta: i32 },

    /// A cross-reference with neither a source nor a target
    #[error("Cross-reference must have a source or a target")]
    InvalidXRef,

    /// A fix-up overlapping one already recorded in the image
    #[error("Fix-up at {start:#x} overlaps fix-up at {existing:#x}")]
    OverlappingFixup { start: usize, existing: usize },

    /// Fix-ups can no longer be added once the image is sealed
    #[error("Fix-ups of image {0} are sealed")]
    FixupsSealed(String),

    /// A byte range outside its image or empty
    #[error("Invalid range {start:#x}..{end:#x} (image length {len:#x})")]
    InvalidRange { start: usize, end: usize, len: usize },

    /// Attribute marking attempted on bytes already attributed
    #[error("Byte at {0:#x} is already attributed")]
    AlreadyAttributed(usize),

    /// The basic block is already in the collection
    #[error("Basic block {0} already exists")]
    BlockExists(String),

    /// The basic block overlaps an existing one
    #[error("Basic block {block} overlaps {existing}")]
    BlockOverlap { block: String, existing: String },

    /// Split point not strictly inside the block or not a lead byte
    #[error("Cannot split {block} at {cutoff:#x}")]
    InvalidSplit { block: String, cutoff: usize },

    /// Dequeue from an empty worklist
    #[error("Worklist is empty")]
    EmptyWorklist,

    #[error("Unknown image: {0}")]
    UnknownImage(u32),

    #[error("Unknown segment: {0}")]
    UnknownSegment(u32),

    /// Symbol names must be unique within an address space
    #[error("Duplicate symbol: {0}")]
    DuplicateSymbol(String),

    /// A procedure already exists at this entry point
    #[error("Procedure already exists at {0}")]
    ProcedureExists(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A broken engine invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for dosflow operations
pub type Result<T> = std::result::Result<T, DosflowError>;
