//! Blocking facade over an asynchronous [`NodeStore`]
//!
//! [`Graph`] pairs a store with the bridge timeout and exposes one blocking
//! call per store operation the read path and the reporter need. Every call
//! goes through [`crate::bridge`], so a store that never answers surfaces as
//! `StoreUnavailable` after the timeout instead of hanging the caller.

use crate::aggregate::AggregateNode;
use crate::bridge::wait_for;
use crate::config::GraphConfig;
use crate::error::Result;
use crate::model::{aggregator, measure};
use crate::node::{LeafNode, TypedNode};
use crate::store::{Callback, MemoryStore, NodeRef, NodeStore, Time, Value, World};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default bound on any single bridged wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Graph {
    store: Arc<dyn NodeStore>,
    timeout: Option<Duration>,
}

impl Graph {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self {
            store,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Graph over a [`MemoryStore`] built from the configuration
    pub fn from_config(config: &GraphConfig) -> Result<Self> {
        let store = MemoryStore::from_config(&config.store)?;
        Ok(Self::new(Arc::new(store)).with_timeout(config.bridge_timeout()))
    }

    /// `None` waits forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Block on one store operation
    pub fn wait<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Callback<T>),
    {
        wait_for(self.timeout, op)
    }

    pub fn connect(&self) -> Result<()> {
        self.wait(|cb| self.store.connect(cb))?;
        info!("Graph connected");
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.wait(|cb| self.store.disconnect(cb))?;
        info!("Graph disconnected");
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.wait(|cb| self.store.save(cb))
    }

    pub fn register_index(&self, world: World, index: &str) -> Result<()> {
        self.wait(|cb| self.store.register_index(world, index, cb))
    }

    /// Every node of a global index visible at `time`
    pub fn find_all(&self, world: World, time: Time, index: &str) -> Result<Vec<NodeRef>> {
        self.wait(|cb| self.store.query_index(world, time, index, None, cb))
    }

    pub fn find(&self, world: World, time: Time, index: &str, key: &str) -> Result<Vec<NodeRef>> {
        self.wait(|cb| self.store.query_index(world, time, index, Some(key), cb))
    }

    pub fn get(&self, node: NodeRef, name: &str) -> Result<Option<Value>> {
        self.wait(|cb| self.store.get_property(node, name, cb))
    }

    pub fn history(&self, node: NodeRef, name: &str) -> Result<Vec<(Time, Value)>> {
        self.wait(|cb| self.store.property_history(node, name, cb))
    }

    pub fn relation(&self, node: NodeRef, relation: &str) -> Result<Vec<NodeRef>> {
        self.wait(|cb| self.store.traverse_relation(node, relation, cb))
    }

    /// Entries of a keyed relation, all of them when `key` is `None`
    pub fn keyed(&self, node: NodeRef, relation: &str, key: Option<&str>) -> Result<Vec<NodeRef>> {
        self.wait(|cb| self.store.traverse_index(node, relation, key, cb))
    }

    /// Wrap a node in the variant matching its stored type
    pub fn resolve(&self, node: NodeRef) -> Result<TypedNode> {
        let node_type = self.wait(|cb| self.store.node_type(node, cb))?;
        Ok(match node_type.as_deref() {
            Some(aggregator::NODE_TYPE) => {
                TypedNode::Aggregate(AggregateNode::new(self.clone(), node))
            }
            Some(measure::NODE_TYPE) => TypedNode::Leaf(LeafNode::new(self.clone(), node)),
            _ => TypedNode::Plain {
                graph: self.clone(),
                node,
            },
        })
    }
}
