//! Versioned node store contract
//!
//! A node is addressed by `(world, time, id)`. The time component of a
//! [`NodeRef`] is the point in time every read and write through that
//! reference happens at: writing a property creates the version visible at
//! and after that time without touching earlier versions.
//!
//! Every operation is asynchronous and completes exactly once through its
//! [`Callback`]. A store may invoke the callback on any thread, including the
//! calling one. Callbacks must not block on further store operations; the
//! blocking side of the protocol lives in [`crate::bridge`].
//!
//! ```text
//! caller ──► store.op(args, callback) ──► (worker) ──► callback(Result<T>)
//! ```

mod executor;
pub mod memory;

pub use executor::WorkerPool;
pub use memory::MemoryStore;

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type World = u64;
pub type Time = i64;
pub type NodeId = u64;

/// Completion handler for an asynchronous store operation
pub type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// Address of a node as seen from one world at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub world: World,
    pub time: Time,
    pub id: NodeId,
}

impl NodeRef {
    pub fn new(world: World, time: Time, id: NodeId) -> Self {
        Self { world, time, id }
    }

    /// Same node viewed at another point in time
    pub fn at(self, time: Time) -> Self {
        Self { time, ..self }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{world:{}, time:{}, id:{}}}", self.world, self.time, self.id)
    }
}

/// Declared type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Double,
    Long,
    Bool,
}

/// Scalar property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    String(String),
    Double(f64),
    Long(i64),
    Bool(bool),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Double(_) => ValueType::Double,
            Value::Long(_) => ValueType::Long,
            Value::Bool(_) => ValueType::Bool,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Key under which this value is stored in an index
    pub fn index_key(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Double(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
        }
    }

    /// Check the value against a declared type
    pub fn expect_type(&self, attribute: &str, expected: ValueType) -> Result<()> {
        let found = self.value_type();
        if found == expected {
            Ok(())
        } else {
            Err(GraphError::TypeMismatch {
                attribute: attribute.to_string(),
                expected,
                found,
            })
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Double(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

/// Minimum operation set the attribution graph needs from a store
///
/// Relation and index reads only return entries added at or before the
/// time of the reference they are issued through. Global indexes are
/// partitioned by world.
pub trait NodeStore: Send + Sync {
    fn connect(&self, done: Callback<()>);

    fn disconnect(&self, done: Callback<()>);

    /// Flush pending state to the backing storage, if any
    fn save(&self, done: Callback<()>);

    /// Allocate a node, optionally tagged with a node type name
    fn create_node(&self, world: World, time: Time, node_type: Option<&str>, done: Callback<NodeRef>);

    fn node_type(&self, node: NodeRef, done: Callback<Option<String>>);

    fn set_property(
        &self,
        node: NodeRef,
        name: &str,
        value_type: ValueType,
        value: Value,
        done: Callback<()>,
    );

    fn get_property(&self, node: NodeRef, name: &str, done: Callback<Option<Value>>);

    /// Every version of a property in ascending time order
    fn property_history(&self, node: NodeRef, name: &str, done: Callback<Vec<(Time, Value)>>);

    fn add_to_relation(&self, node: NodeRef, relation: &str, target: NodeRef, done: Callback<()>);

    fn traverse_relation(&self, node: NodeRef, relation: &str, done: Callback<Vec<NodeRef>>);

    /// Add `target` to a relation of `node` under `key`
    fn local_index(
        &self,
        node: NodeRef,
        relation: &str,
        key: &str,
        target: NodeRef,
        done: Callback<()>,
    );

    /// Entries of a keyed relation, all of them when `key` is `None`
    fn traverse_index(
        &self,
        node: NodeRef,
        relation: &str,
        key: Option<&str>,
        done: Callback<Vec<NodeRef>>,
    );

    fn register_index(&self, world: World, index: &str, done: Callback<()>);

    fn index_node(&self, index: &str, key: &str, node: NodeRef, done: Callback<()>);

    /// Nodes of a global index, all of them when `key` is `None`
    fn query_index(
        &self,
        world: World,
        time: Time,
        index: &str,
        key: Option<&str>,
        done: Callback<Vec<NodeRef>>,
    );
}
