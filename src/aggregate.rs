//! Lazily computed power aggregate
//!
//! An [`AggregateNode`] stores nothing of its own. Reading its `value`
//! traverses the `child` relation at the node's reference time, reads every
//! child leaf at that time through one [`DeferCounter`], and sums them.
//!
//! ```text
//! value() ──► traverse(child) ──► [leaf₁ … leafₙ]
//!                                    │ get(value) × n   (one latch)
//!                                    ▼
//!                                 Σ valueᵢ
//! ```
//!
//! Zero children sum to `0.0`. A child without a version at the read time
//! is a `MissingValue` error, never a silent zero.

use crate::bridge::DeferCounter;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::model::{aggregator, measure};
use crate::node::{leaf_value, Readable};
use crate::store::{NodeRef, Value, ValueType};
use tracing::trace;

pub struct AggregateNode {
    graph: Graph,
    node: NodeRef,
}

impl AggregateNode {
    pub fn new(graph: Graph, node: NodeRef) -> Self {
        Self { graph, node }
    }

    pub fn node(&self) -> NodeRef {
        self.node
    }

    /// Leaves visible through `child` at the node's reference time
    pub fn children(&self) -> Result<Vec<NodeRef>> {
        self.graph.relation(self.node, aggregator::REL_CHILD)
    }

    /// Attach a leaf; the child set only grows
    pub fn attach(&self, leaf: NodeRef) -> Result<()> {
        self.graph.wait(|cb| {
            self.graph
                .store()
                .add_to_relation(self.node, aggregator::REL_CHILD, leaf, cb)
        })
    }

    /// Only `value` is readable
    pub fn get(&self, attribute: &str) -> Result<Value> {
        if attribute == aggregator::ATT_VALUE {
            Ok(Value::Double(self.value()?))
        } else {
            Err(GraphError::UnknownAttribute {
                node_type: aggregator::NODE_TYPE.to_string(),
                attribute: attribute.to_string(),
            })
        }
    }

    /// Always rejected: the value is derived
    pub fn set(&self, attribute: &str, _value_type: ValueType, _value: Value) -> Result<()> {
        Err(GraphError::UnsupportedOperation {
            node_type: aggregator::NODE_TYPE.to_string(),
            attribute: attribute.to_string(),
        })
    }
}

impl Readable for AggregateNode {
    fn value(&self) -> Result<f64> {
        let children = self.children()?;
        let time = self.node.time;
        let counter = DeferCounter::new(children.len());
        for child in children.iter().map(|c| c.at(time)) {
            let done = counter.wrap();
            self.graph.store().get_property(
                child,
                measure::ATT_VALUE,
                Box::new(move |result| done(result.and_then(|v| leaf_value(child.id, time, v)))),
            );
        }
        let values = counter.wait_all(self.graph.timeout())?;
        trace!(node = self.node.id, time, children = values.len(), "Aggregated children");
        Ok(values.into_iter().sum())
    }
}
