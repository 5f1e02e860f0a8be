//! Unified error types for topology synthesis.
//!
//! Every fallible operation in the workspace returns [`ShiftError`]. Variants
//! are grouped the same way callers tend to handle them:
//!
//! - **Structural**: graph invariants (duplicate names, missing endpoints,
//!   more than one voltage source, ...)
//! - **Input validation**: malformed node/edge data and unusable builder input
//! - **Mapping**: phase and voltage assignment failures
//! - **Resolution**: equipment catalog lookups
//!
//! # Example
//!
//! ```
//! use shift_core::{ShiftError, ShiftResult};
//!
//! fn lookup(name: &str) -> ShiftResult<()> {
//!     Err(ShiftError::NodeDoesNotExist(name.to_string()))
//! }
//!
//! assert!(matches!(lookup("n1"), Err(ShiftError::NodeDoesNotExist(_))));
//! ```

use thiserror::Error;

/// Unified error type for all topology, mapping and resolution operations.
#[derive(Error, Debug)]
pub enum ShiftError {
    // Structural
    #[error("node '{0}' already exists in the graph")]
    NodeAlreadyExists(String),

    #[error("node '{0}' does not exist in the graph")]
    NodeDoesNotExist(String),

    #[error("edge already exists: {0}")]
    EdgeAlreadyExists(String),

    #[error("edge between '{from}' and '{to}' does not exist")]
    EdgeDoesNotExist { from: String, to: String },

    /// A second voltage source was added. Holds the existing and rejected node names.
    #[error("voltage source node '{existing}' already exists, cannot add '{rejected}'")]
    VsourceNodeAlreadyExists { existing: String, rejected: String },

    #[error("voltage source node does not exist on this graph")]
    VsourceNodeDoesNotExist,

    #[error("empty graph: {0}")]
    EmptyGraph(String),

    // Input validation
    #[error("invalid node data: {0}")]
    InvalidNodeData(String),

    #[error("invalid edge data: {0}")]
    InvalidEdgeData(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Mapping
    #[error("invalid phase allocation method: {0}")]
    InvalidPhaseAllocationMethod(String),

    #[error("missing transformer mapping: {0}")]
    MissingTransformerMapping(String),

    #[error("unsupported transformer type: {0}")]
    UnsupportedTransformerType(String),

    /// A transformer edge has no voltage pair. Holds the edge name.
    #[error("voltages not available for transformer '{0}'")]
    MissingVoltageMapping(String),

    #[error("allocation mapping error: {0}")]
    AllocationMapping(String),

    // Resolution
    #[error("equipment not found: {0}")]
    EquipmentNotFound(String),

    #[error("wrong equipment assigned: {0}")]
    WrongEquipmentAssigned(String),

    /// Configuration errors (parse or validation)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using ShiftError.
pub type ShiftResult<T> = Result<T, ShiftError>;

impl ShiftError {
    /// True for errors that describe a broken graph invariant rather than bad input.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ShiftError::NodeAlreadyExists(_)
                | ShiftError::NodeDoesNotExist(_)
                | ShiftError::EdgeAlreadyExists(_)
                | ShiftError::EdgeDoesNotExist { .. }
                | ShiftError::VsourceNodeAlreadyExists { .. }
                | ShiftError::VsourceNodeDoesNotExist
                | ShiftError::EmptyGraph(_)
        )
    }
}
