//! Serializable snapshot of an analysis run.

use serde::{Deserialize, Serialize};

use crate::core::basic_block::BasicBlock;
use crate::core::control_flow_graph::ControlFlowEdge;
use crate::core::diagnostics::Diagnostic;
use crate::core::procedure::{DataItem, Procedure};
use crate::core::reference::XRef;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub blocks: Vec<BasicBlock>,
    pub procedures: Vec<Procedure>,
    pub xrefs: Vec<XRef>,
    pub control_flow: Vec<ControlFlowEdge>,
    pub data_items: Vec<DataItem>,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisReport {
    /// Serialize the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a report written by [`AnalysisReport::to_json`].
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
