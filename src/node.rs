//! Typed views over stored nodes
//!
//! A stored node is either a plain hierarchy node, a measurement leaf
//! holding one time-versioned scalar, or an aggregate whose value is derived
//! on read. The leaf and the aggregate both implement [`Readable`].

use crate::aggregate::AggregateNode;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::model::measure;
use crate::store::{NodeId, NodeRef, Time, Value, ValueType};

/// Nodes exposing one scalar value at their reference time
pub trait Readable {
    fn value(&self) -> Result<f64>;
}

pub enum TypedNode {
    Plain { graph: Graph, node: NodeRef },
    Leaf(LeafNode),
    Aggregate(AggregateNode),
}

impl TypedNode {
    pub fn node(&self) -> NodeRef {
        match self {
            TypedNode::Plain { node, .. } => *node,
            TypedNode::Leaf(leaf) => leaf.node(),
            TypedNode::Aggregate(agg) => agg.node(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TypedNode::Plain { .. } => "Node",
            TypedNode::Leaf(_) => measure::NODE_TYPE,
            TypedNode::Aggregate(_) => crate::model::aggregator::NODE_TYPE,
        }
    }

    /// Read an attribute at the node's reference time
    pub fn get(&self, attribute: &str) -> Result<Option<Value>> {
        match self {
            TypedNode::Plain { graph, node } => graph.get(*node, attribute),
            TypedNode::Leaf(leaf) => leaf.graph.get(leaf.node, attribute),
            TypedNode::Aggregate(agg) => agg.get(attribute).map(Some),
        }
    }

    /// Write an attribute at the node's reference time
    pub fn set(&self, attribute: &str, value_type: ValueType, value: Value) -> Result<()> {
        let (graph, node) = match self {
            TypedNode::Plain { graph, node } => (graph, *node),
            TypedNode::Leaf(leaf) => (&leaf.graph, leaf.node),
            TypedNode::Aggregate(agg) => return agg.set(attribute, value_type, value),
        };
        graph.wait(|cb| graph.store().set_property(node, attribute, value_type, value, cb))
    }

    pub fn as_readable(&self) -> Option<&dyn Readable> {
        match self {
            TypedNode::Plain { .. } => None,
            TypedNode::Leaf(leaf) => Some(leaf),
            TypedNode::Aggregate(agg) => Some(agg),
        }
    }
}

/// Decode a leaf's `value` read; an absent version is a hard error
pub(crate) fn leaf_value(node: NodeId, time: Time, value: Option<Value>) -> Result<f64> {
    let value = value.ok_or_else(|| GraphError::MissingValue {
        node,
        attribute: measure::ATT_VALUE.to_string(),
        time,
    })?;
    value.expect_type(measure::ATT_VALUE, measure::ATT_VALUE_TYPE)?;
    value.as_f64().ok_or(GraphError::TypeMismatch {
        attribute: measure::ATT_VALUE.to_string(),
        expected: measure::ATT_VALUE_TYPE,
        found: value.value_type(),
    })
}

/// One thread's time series of observed wattage
pub struct LeafNode {
    graph: Graph,
    node: NodeRef,
}

impl LeafNode {
    pub fn new(graph: Graph, node: NodeRef) -> Self {
        Self { graph, node }
    }

    pub fn node(&self) -> NodeRef {
        self.node
    }

    /// Record `value` as the version visible from `timestamp` on
    ///
    /// Earlier versions are untouched; a second write at the same timestamp
    /// replaces that version only.
    pub fn write_value(&self, timestamp: Time, value: f64) -> Result<()> {
        let at = self.node.at(timestamp);
        self.graph.wait(|cb| {
            self.graph.store().set_property(
                at,
                measure::ATT_VALUE,
                measure::ATT_VALUE_TYPE,
                Value::Double(value),
                cb,
            )
        })
    }

    /// Every recorded version in time order
    pub fn history(&self) -> Result<Vec<(Time, f64)>> {
        self.graph
            .history(self.node, measure::ATT_VALUE)?
            .into_iter()
            .map(|(time, value)| Ok((time, leaf_value(self.node.id, time, Some(value))?)))
            .collect()
    }
}

impl Readable for LeafNode {
    fn value(&self) -> Result<f64> {
        let value = self.graph.get(self.node, measure::ATT_VALUE)?;
        leaf_value(self.node.id, self.node.time, value)
    }
}
