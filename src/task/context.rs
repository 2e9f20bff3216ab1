//! Execution state threaded through a task's actions
//!
//! The context carries the current world and time, the named variables bound
//! by earlier actions, and the current result every action reads from and
//! writes to.

use crate::error::{GraphError, Result};
use crate::store::{NodeRef, Time, Value, World};
use std::collections::HashMap;

/// One element of a task result or variable
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Node(NodeRef),
    Value(Value),
}

impl Slot {
    pub fn as_node(&self) -> Option<NodeRef> {
        match self {
            Slot::Node(node) => Some(*node),
            Slot::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Value(value) => Some(value),
            Slot::Node(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    world: World,
    time: Time,
    vars: HashMap<String, Vec<Slot>>,
    result: Vec<Slot>,
}

impl TaskContext {
    pub fn new(world: World, time: Time) -> Self {
        Self {
            world,
            time,
            vars: HashMap::new(),
            result: Vec::new(),
        }
    }

    /// Bind a scalar variable before execution
    pub fn with_var(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.vars
            .insert(name.to_string(), vec![Slot::Value(value.into())]);
        self
    }

    pub fn world(&self) -> World {
        self.world
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub(crate) fn set_world(&mut self, world: World) {
        self.world = world;
    }

    pub(crate) fn set_time(&mut self, time: Time) {
        self.time = time;
    }

    pub fn result(&self) -> &[Slot] {
        &self.result
    }

    /// Nodes of the current result, values skipped
    pub fn result_nodes(&self) -> Vec<NodeRef> {
        self.result.iter().filter_map(Slot::as_node).collect()
    }

    pub(crate) fn set_result(&mut self, result: Vec<Slot>) {
        self.result = result;
    }

    pub(crate) fn set_result_nodes(&mut self, nodes: Vec<NodeRef>) {
        self.result = nodes.into_iter().map(Slot::Node).collect();
    }

    pub fn var(&self, name: &str) -> Result<&[Slot]> {
        self.vars
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| GraphError::UnboundVariable(name.to_string()))
    }

    /// First scalar bound to `name`
    pub fn var_value(&self, name: &str) -> Result<&Value> {
        self.var(name)?
            .iter()
            .find_map(Slot::as_value)
            .ok_or_else(|| GraphError::UnboundVariable(name.to_string()))
    }

    pub fn var_nodes(&self, name: &str) -> Result<Vec<NodeRef>> {
        Ok(self.var(name)?.iter().filter_map(Slot::as_node).collect())
    }

    pub(crate) fn define(&mut self, name: &str, slots: Vec<Slot>) {
        self.vars.insert(name.to_string(), slots);
    }
}
