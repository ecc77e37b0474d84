//! # AutoSafe Engine
//!
//! Risk and assurance computation for automotive functional-safety models.
//! Turns ratings attached to a node graph into:
//! - Prototype Assurance Levels (PAL 1–5) propagated through AND/OR gates
//! - cut sets describing which leaf causes trigger a top event
//! - FMEDA hardware metrics compared against ASIL targets
//!
//! The engine performs no I/O. Hosts build a [`NodeGraph`], call
//! [`evaluate_levels`], [`cut_sets`] or [`fmeda_rollup`], and read the
//! results.

use thiserror::Error;

pub mod asil;
pub mod assurance;
pub mod config;
pub mod fmeda;
pub mod fta;
pub mod graph;
pub mod scores;

pub use asil::{AsilLevel, MetricTargets};
pub use assurance::{evaluate_levels, evaluate_node, LevelReport, NodeLevel, SeverityScope};
pub use config::{ConfigError, EngineConfig};
pub use fmeda::{fmeda_rollup, Component, FmedaReport, GoalSpec};
pub use fta::{cut_sets, CutSetAnalysis, CutSetFamily};
pub use graph::{GateType, Node, NodeGraph, NodeId, NodeKind};

/// Engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Out-of-range argument or attribute; a caller bug
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Parent/child edges form a cycle through this node
    #[error("Cycle detected at {node}")]
    CycleDetected { node: NodeId },
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::CycleDetected { node: NodeId(7) };
        assert_eq!(err.to_string(), "Cycle detected at Node 7");

        let err: EngineError = ConfigError::Validation("bad".to_string()).into();
        assert!(err.to_string().contains("bad"));
    }
}
