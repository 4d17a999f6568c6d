//! Static control-flow analysis for 16-bit x86 code.
//!
//! Load images and module tables into an [`AddressSpace`], hand it to an
//! [`Analyzer`] with one or more [`EntryPoint`]s, and read back basic blocks,
//! cross-references, procedures and diagnostics.

/// Core data types module
pub mod core;

/// Decoder backends
pub mod disasm;

/// Analysis passes
pub mod analysis;

pub mod config;
pub mod error;
pub mod logging;

pub use crate::analysis::engine::{Analyzer, EntryPoint};
pub use crate::analysis::report::AnalysisReport;
pub use crate::config::AnalysisConfig;
pub use crate::core::address::{LogicalAddress, Referent, ResolvedAddress};
pub use crate::core::address_space::AddressSpace;
pub use crate::error::{DosflowError, Result};
