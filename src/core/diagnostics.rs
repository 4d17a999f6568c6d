//! Analysis findings.
//!
//! Everything the engine notices while following code (jumps into data,
//! dynamic targets, broken fix-ups, ...) is appended to an [`ErrorList`]
//! instead of being returned as an error. The list is the complete audit
//! trail of an analysis run.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::address::LogicalAddress;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCategory {
    Message,
    Warning,
    Error,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Message => write!(f, "message"),
            ErrorCategory::Warning => write!(f, "warning"),
            ErrorCategory::Error => write!(f, "error"),
        }
    }
}

/// Kinds of analysis findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Flow reached bytes already attributed as data
    RanIntoData,
    /// Flow reached the middle of an analyzed instruction
    RanIntoCode,
    /// An instruction would overlap already analyzed bytes
    OverlappingInstruction,
    /// The next instruction address leaves the 16-bit range
    AddressWrapped,
    /// A procedure is called both near and far
    InconsistentCall,
    /// Target of a branch or call cannot be determined statically
    DynamicTarget,
    /// A target's referent does not resolve to an image
    UnresolvedTarget,
    /// A fix-up does not line up with the operand it patches
    BrokenFixup,
    /// Bytes that do not decode to an instruction
    InvalidInstruction,
    /// A target resolves outside of its image
    OutOfImage,
    /// Two segments share bytes
    SegmentOverlap,
}

impl ErrorCode {
    /// Severity of findings with this code.
    pub const fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::DynamicTarget => ErrorCategory::Message,
            ErrorCode::UnresolvedTarget => ErrorCategory::Warning,
            ErrorCode::RanIntoData
            | ErrorCode::RanIntoCode
            | ErrorCode::OverlappingInstruction
            | ErrorCode::AddressWrapped
            | ErrorCode::InconsistentCall
            | ErrorCode::BrokenFixup
            | ErrorCode::InvalidInstruction
            | ErrorCode::OutOfImage
            | ErrorCode::SegmentOverlap => ErrorCategory::Error,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Where the finding was made; `None` for findings without a location
    pub location: Option<LogicalAddress>,
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} {} at {}: {}", self.category, self.code, loc, self.message),
            None => write!(f, "{} {}: {}", self.category, self.code, self.message),
        }
    }
}

/// Append-only list of findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorList {
    entries: Vec<Diagnostic>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finding.
    pub fn push(
        &mut self,
        location: Option<LogicalAddress>,
        code: ErrorCode,
        message: impl Into<String>,
    ) {
        self.entries.push(Diagnostic {
            location,
            code,
            category: code.category(),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Findings with the given code
    pub fn with_code(&self, code: ErrorCode) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.code == code)
    }

    /// Count findings with the given code
    pub fn count(&self, code: ErrorCode) -> usize {
        self.with_code(code).count()
    }

    /// Check if any finding is in the error category
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.category == ErrorCategory::Error)
    }
}
