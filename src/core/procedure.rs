//! Procedures and the call graph.
//!
//! A procedure is identified by its resolved entry point, so calls reaching
//! the same bytes through different logical addresses name one procedure.
//! Procedures do not own blocks; they list the start addresses of blocks
//! reachable from their entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::address::{LogicalAddress, ResolvedAddress};
use crate::core::reference::{XRef, XRefCollection, XRefType};
use crate::error::{DosflowError, Result};

/// How a procedure expects to be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallType {
    Near,
    Far,
}

impl CallType {
    /// Call type implied by a cross-reference, if it is a call.
    pub fn of(kind: XRefType) -> Option<CallType> {
        match kind {
            XRefType::NearCall => Some(CallType::Near),
            XRefType::FarCall => Some(CallType::Far),
            _ => None,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            CallType::Near => "near",
            CallType::Far => "far",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    /// Canonical identity
    pub entry: ResolvedAddress,
    /// Logical address the procedure was first reached through
    pub address: LogicalAddress,
    pub name: String,
    pub call_type: CallType,
    /// Start addresses of the blocks reachable from the entry
    pub blocks: Vec<ResolvedAddress>,
}

impl Procedure {
    pub fn new(
        entry: ResolvedAddress,
        address: LogicalAddress,
        name: impl Into<String>,
        call_type: CallType,
    ) -> Self {
        Self {
            entry,
            address,
            name: name.into(),
            call_type,
            blocks: Vec::new(),
        }
    }

    /// Check if the procedure owns the block starting at `block`
    pub fn contains_block(&self, block: ResolvedAddress) -> bool {
        self.blocks.contains(&block)
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {}", self.call_type.value(), self.name, self.entry)
    }
}

/// A data object discovered during code analysis, such as a jump-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    pub address: ResolvedAddress,
    pub location: LogicalAddress,
    pub size: usize,
    /// Entry of the procedure the item belongs to
    pub owner: Option<ResolvedAddress>,
}

/// Procedures keyed by entry point, plus the call-only XRef graph.
#[derive(Debug, Default)]
pub struct ProcedureCollection {
    procedures: BTreeMap<ResolvedAddress, Procedure>,
    calls: XRefCollection,
}

impl ProcedureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a procedure; its entry must be new.
    pub fn add(&mut self, procedure: Procedure) -> Result<()> {
        if self.procedures.contains_key(&procedure.entry) {
            return Err(DosflowError::ProcedureExists(procedure.entry.to_string()));
        }
        self.procedures.insert(procedure.entry, procedure);
        Ok(())
    }

    /// Get the procedure at a resolved entry
    pub fn get(&self, entry: ResolvedAddress) -> Option<&Procedure> {
        self.procedures.get(&entry)
    }

    pub fn get_mut(&mut self, entry: ResolvedAddress) -> Option<&mut Procedure> {
        self.procedures.get_mut(&entry)
    }

    /// Find a procedure by name
    pub fn by_name(&self, name: &str) -> Option<&Procedure> {
        self.procedures.values().find(|p| p.name == name)
    }

    /// The procedure whose block list contains `block`.
    pub fn containing_block(&self, block: ResolvedAddress) -> Option<&Procedure> {
        self.procedures.values().find(|p| p.contains_block(block))
    }

    /// Record a call edge; only call-type references are accepted.
    pub fn add_call(&mut self, xref: XRef) -> Result<()> {
        if !xref.kind().is_call() {
            return Err(DosflowError::Internal(format!(
                "not a call reference: {}",
                xref
            )));
        }
        self.calls.add(xref)
    }

    /// The call graph as cross-references
    pub fn calls(&self) -> &XRefCollection {
        &self.calls
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    /// Entry addresses in address order
    pub fn entries(&self) -> impl Iterator<Item = &ResolvedAddress> {
        self.procedures.keys()
    }

    pub fn contains(&self, entry: ResolvedAddress) -> bool {
        self.procedures.contains_key(&entry)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}
