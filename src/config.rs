//! Configuration for the analysis engine.
//!
//! Every section has defaults suitable for whole-program analysis, so a
//! configuration file only needs to name the values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DosflowError, Result};

/// Master configuration for an analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Bounds on the amount of work done by one run.
    pub limits: LimitsConfig,
    /// Heuristics used to recover indirect control flow.
    pub heuristics: HeuristicsConfig,
    /// Cross-reference emission options.
    pub xrefs: XRefConfig,
    /// Segment layout validation.
    pub layout: LayoutConfig,
}

impl AnalysisConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that every limit is positive.
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_worklist_items == 0 {
            return Err(DosflowError::Config(
                "limits.max_worklist_items must be positive".into(),
            ));
        }
        if self.limits.max_instructions == 0 {
            return Err(DosflowError::Config(
                "limits.max_instructions must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Work limits. Reaching one stops the worklist drain early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of worklist items processed (default: 1000000).
    pub max_worklist_items: usize,
    /// Maximum number of instructions decoded (default: 1000000).
    pub max_instructions: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_worklist_items: 1_000_000,
            max_instructions: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    /// Follow near jumps through `cs:` tables (default: true).
    pub jump_tables: bool,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self { jump_tables: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XRefConfig {
    /// Record the not-taken branch of conditional jumps (default: true).
    pub emit_fallthrough: bool,
}

impl Default for XRefConfig {
    fn default() -> Self {
        Self {
            emit_fallthrough: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Report segments that share bytes (default: true).
    pub check_segment_overlaps: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            check_segment_overlaps: true,
        }
    }
}
