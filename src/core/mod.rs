//! Core data types for dosflow.
//!
//! This module contains the address model, the loaded images and module
//! tables, and the collections the analysis engine fills: cross-references,
//! basic blocks, procedures and the control flow graph.

pub mod address;
pub mod address_space;
pub mod basic_block;
pub mod control_flow_graph;
pub mod diagnostics;
pub mod disassembler;
pub mod fixup;
pub mod graph;
pub mod image;
pub mod instruction;
pub mod procedure;
pub mod reference;
pub mod segment;
pub mod worklist;
