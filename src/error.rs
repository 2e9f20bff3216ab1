//! Error taxonomy for the attribution graph
//!
//! Every fallible library operation returns [`Result`]. Store implementations
//! report failures through the same enum so the sync bridge can surface them
//! to the blocking caller unchanged.

use crate::store::{NodeId, Time, ValueType};
use thiserror::Error;

/// Errors raised by the store, the pipeline, the bridge and the read path
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// The store is disconnected, reported a failure, or never completed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A unique-key lookup returned more than one node
    #[error("Index {index:?} holds {found} nodes for unique key {key:?}")]
    IndexCorrupt {
        index: String,
        key: String,
        found: usize,
    },

    /// A leaf read found no version at or before the requested time
    #[error("Node {node} has no {attribute:?} at time {time}")]
    MissingValue {
        node: NodeId,
        attribute: String,
        time: Time,
    },

    /// Write attempted on a derived attribute
    #[error("{node_type} attribute {attribute:?} is derived and cannot be written")]
    UnsupportedOperation {
        node_type: String,
        attribute: String,
    },

    /// Read attempted on an attribute the node type does not expose
    #[error("{node_type} has no readable attribute {attribute:?}")]
    UnknownAttribute {
        node_type: String,
        attribute: String,
    },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Index {0:?} is not registered")]
    UnknownIndex(String),

    #[error("Type mismatch for {attribute:?}: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        attribute: String,
        expected: ValueType,
        found: ValueType,
    },

    /// A pipeline step referenced a variable no earlier step bound
    #[error("Task variable {0:?} is not bound")]
    UnboundVariable(String),

    /// A sample carries a value the graph cannot persist
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GraphError {
    /// Whether re-submitting the same sample or query may succeed
    ///
    /// Missing values can be a visibility delay under eventual consistency,
    /// and an unavailable store may come back.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GraphError::StoreUnavailable(_) | GraphError::MissingValue { .. }
        )
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, GraphError>;
