//! Analysis passes over an address space.
//!
//! The engine drives block discovery from a priority worklist. Fix-up
//! resolution, the jump-table heuristic and the segment layout check are
//! kept in their own modules so they can be tested in isolation.

pub mod engine;
pub mod fixup_resolver;
pub mod jump_table;
pub mod layout;
pub mod report;
