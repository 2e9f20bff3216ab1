//! In-memory time-versioned node store
//!
//! Reference implementation of [`NodeStore`] used by the reporter, the CLI,
//! benches and tests. State lives behind one `RwLock`; operations are
//! completed by a [`WorkerPool`] and callbacks always run after the lock has
//! been released, so a callback may immediately issue the next operation.
//!
//! # Versioning
//!
//! - Properties: `BTreeMap<time, value>`. A write at `t` replaces only the
//!   version at exactly `t`; a read at `q` sees the greatest version `<= q`.
//! - Relation and index entries carry the time they were added and are only
//!   visible through references at or after that time.
//!
//! # Persistence
//!
//! When a snapshot path is configured the whole state is written as JSON on
//! `save` and `disconnect`, and loaded back on `connect`.

use super::{
    Callback, NodeId, NodeRef, NodeStore, Time, Value, ValueType, WorkerPool, World,
};
use crate::config::StoreConfig;
use crate::error::{GraphError, Result};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Series {
    value_type: ValueType,
    versions: BTreeMap<Time, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    since: Time,
    target: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KeyedEntry {
    since: Time,
    key: String,
    target: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRecord {
    world: World,
    created: Time,
    node_type: Option<String>,
    properties: FnvHashMap<String, Series>,
    relations: FnvHashMap<String, Vec<Entry>>,
    keyed: FnvHashMap<String, Vec<KeyedEntry>>,
}

impl NodeRecord {
    fn new(world: World, created: Time, node_type: Option<String>) -> Self {
        Self {
            world,
            created,
            node_type,
            properties: FnvHashMap::default(),
            relations: FnvHashMap::default(),
            keyed: FnvHashMap::default(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(skip)]
    connected: bool,
    next_id: NodeId,
    nodes: FnvHashMap<NodeId, NodeRecord>,
    /// world -> index name -> entries
    indexes: FnvHashMap<World, FnvHashMap<String, Vec<KeyedEntry>>>,
}

impl StoreState {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(GraphError::StoreUnavailable(
                "Store is not connected".to_string(),
            ))
        }
    }

    fn node(&self, node: NodeRef) -> Result<&NodeRecord> {
        self.ensure_connected()?;
        self.nodes
            .get(&node.id)
            .filter(|record| record.world == node.world)
            .ok_or(GraphError::UnknownNode(node.id))
    }

    fn node_mut(&mut self, node: NodeRef) -> Result<&mut NodeRecord> {
        self.ensure_connected()?;
        self.nodes
            .get_mut(&node.id)
            .filter(|record| record.world == node.world)
            .ok_or(GraphError::UnknownNode(node.id))
    }

    fn index(&self, world: World, index: &str) -> Result<&Vec<KeyedEntry>> {
        self.ensure_connected()?;
        self.indexes
            .get(&world)
            .and_then(|tables| tables.get(index))
            .ok_or_else(|| GraphError::UnknownIndex(index.to_string()))
    }
}

fn visible_keyed(entries: &[KeyedEntry], time: Time, key: Option<&str>) -> Vec<NodeId> {
    entries
        .iter()
        .filter(|e| e.since <= time && key.map_or(true, |k| e.key == k))
        .map(|e| e.target)
        .collect()
}

fn push_keyed(entries: &mut Vec<KeyedEntry>, entry: KeyedEntry) {
    let exists = entries
        .iter()
        .any(|e| e.key == entry.key && e.target == entry.target);
    if !exists {
        entries.push(entry);
    }
}

/// Time-versioned in-memory graph store
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    pool: WorkerPool,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Store that completes every operation inline on the calling thread
    pub fn inline() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            pool: WorkerPool::inline(),
            snapshot_path: None,
        }
    }

    /// Store completing operations on `workers` background threads
    pub fn with_workers(workers: usize) -> Result<Self> {
        Ok(Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            pool: WorkerPool::new(workers)?,
            snapshot_path: None,
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let store = Self::with_workers(config.workers)?;
        Ok(match &config.snapshot_path {
            Some(path) => store.with_snapshot(path),
            None => store,
        })
    }

    /// Persist state as a JSON snapshot at `path`
    pub fn with_snapshot<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Number of allocated nodes across all worlds
    pub fn node_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes
            .len()
    }

    fn submit<T, F>(&self, done: Callback<T>, op: F)
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreState) -> Result<T> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.pool.execute(move || {
            let result = {
                let mut guard = state.write().unwrap_or_else(PoisonError::into_inner);
                op(&mut guard)
            };
            done(result);
        });
    }

    fn submit_read<T, F>(&self, done: Callback<T>, op: F)
    where
        T: Send + 'static,
        F: FnOnce(&StoreState) -> Result<T> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.pool.execute(move || {
            let result = {
                let guard = state.read().unwrap_or_else(PoisonError::into_inner);
                op(&guard)
            };
            done(result);
        });
    }

    fn write_snapshot(state: &StoreState, path: &Path) -> Result<()> {
        let bytes =
            serde_json::to_vec(state).map_err(|e| GraphError::Snapshot(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|e| GraphError::Snapshot(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), nodes = state.nodes.len(), "Snapshot written");
        Ok(())
    }

    fn read_snapshot(path: &Path) -> Result<Option<StoreState>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)
            .map_err(|e| GraphError::Snapshot(format!("{}: {}", path.display(), e)))?;
        let state: StoreState =
            serde_json::from_slice(&bytes).map_err(|e| GraphError::Snapshot(e.to_string()))?;
        Ok(Some(state))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::inline()
    }
}

impl NodeStore for MemoryStore {
    fn connect(&self, done: Callback<()>) {
        let snapshot = self.snapshot_path.clone();
        self.submit(done, move |state| {
            if state.connected {
                return Ok(());
            }
            if let Some(path) = snapshot {
                if let Some(loaded) = Self::read_snapshot(&path)? {
                    info!(path = %path.display(), nodes = loaded.nodes.len(), "Snapshot loaded");
                    *state = loaded;
                }
            }
            state.connected = true;
            Ok(())
        });
    }

    fn disconnect(&self, done: Callback<()>) {
        let snapshot = self.snapshot_path.clone();
        self.submit(done, move |state| {
            if !state.connected {
                return Ok(());
            }
            if let Some(path) = snapshot {
                Self::write_snapshot(state, &path)?;
            }
            state.connected = false;
            Ok(())
        });
    }

    fn save(&self, done: Callback<()>) {
        let snapshot = self.snapshot_path.clone();
        self.submit_read(done, move |state| {
            state.ensure_connected()?;
            match snapshot {
                Some(path) => Self::write_snapshot(state, &path),
                None => Ok(()),
            }
        });
    }

    fn create_node(&self, world: World, time: Time, node_type: Option<&str>, done: Callback<NodeRef>) {
        let node_type = node_type.map(str::to_string);
        self.submit(done, move |state| {
            state.ensure_connected()?;
            let id = state.next_id;
            state.next_id += 1;
            state
                .nodes
                .insert(id, NodeRecord::new(world, time, node_type));
            Ok(NodeRef::new(world, time, id))
        });
    }

    fn node_type(&self, node: NodeRef, done: Callback<Option<String>>) {
        self.submit_read(done, move |state| Ok(state.node(node)?.node_type.clone()));
    }

    fn set_property(
        &self,
        node: NodeRef,
        name: &str,
        value_type: ValueType,
        value: Value,
        done: Callback<()>,
    ) {
        let name = name.to_string();
        self.submit(done, move |state| {
            value.expect_type(&name, value_type)?;
            let record = state.node_mut(node)?;
            let series = record.properties.entry(name.clone()).or_insert_with(|| Series {
                value_type,
                versions: BTreeMap::new(),
            });
            if series.value_type != value_type {
                return Err(GraphError::TypeMismatch {
                    attribute: name,
                    expected: series.value_type,
                    found: value_type,
                });
            }
            series.versions.insert(node.time, value);
            Ok(())
        });
    }

    fn get_property(&self, node: NodeRef, name: &str, done: Callback<Option<Value>>) {
        let name = name.to_string();
        self.submit_read(done, move |state| {
            let record = state.node(node)?;
            Ok(record.properties.get(&name).and_then(|series| {
                series
                    .versions
                    .range(..=node.time)
                    .next_back()
                    .map(|(_, v)| v.clone())
            }))
        });
    }

    fn property_history(&self, node: NodeRef, name: &str, done: Callback<Vec<(Time, Value)>>) {
        let name = name.to_string();
        self.submit_read(done, move |state| {
            let record = state.node(node)?;
            Ok(record
                .properties
                .get(&name)
                .map(|series| {
                    series
                        .versions
                        .iter()
                        .map(|(t, v)| (*t, v.clone()))
                        .collect()
                })
                .unwrap_or_default())
        });
    }

    fn add_to_relation(&self, node: NodeRef, relation: &str, target: NodeRef, done: Callback<()>) {
        let relation = relation.to_string();
        self.submit(done, move |state| {
            state.node(target)?;
            let record = state.node_mut(node)?;
            let entries = record.relations.entry(relation).or_default();
            if !entries.iter().any(|e| e.target == target.id) {
                entries.push(Entry {
                    since: node.time,
                    target: target.id,
                });
            }
            Ok(())
        });
    }

    fn traverse_relation(&self, node: NodeRef, relation: &str, done: Callback<Vec<NodeRef>>) {
        let relation = relation.to_string();
        self.submit_read(done, move |state| {
            let record = state.node(node)?;
            Ok(record
                .relations
                .get(&relation)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|e| e.since <= node.time)
                        .map(|e| NodeRef::new(node.world, node.time, e.target))
                        .collect()
                })
                .unwrap_or_default())
        });
    }

    fn local_index(
        &self,
        node: NodeRef,
        relation: &str,
        key: &str,
        target: NodeRef,
        done: Callback<()>,
    ) {
        let relation = relation.to_string();
        let key = key.to_string();
        self.submit(done, move |state| {
            state.node(target)?;
            let record = state.node_mut(node)?;
            push_keyed(
                record.keyed.entry(relation).or_default(),
                KeyedEntry {
                    since: node.time,
                    key,
                    target: target.id,
                },
            );
            Ok(())
        });
    }

    fn traverse_index(
        &self,
        node: NodeRef,
        relation: &str,
        key: Option<&str>,
        done: Callback<Vec<NodeRef>>,
    ) {
        let relation = relation.to_string();
        let key = key.map(str::to_string);
        self.submit_read(done, move |state| {
            let record = state.node(node)?;
            Ok(record
                .keyed
                .get(&relation)
                .map(|entries| {
                    visible_keyed(entries, node.time, key.as_deref())
                        .into_iter()
                        .map(|id| NodeRef::new(node.world, node.time, id))
                        .collect()
                })
                .unwrap_or_default())
        });
    }

    fn register_index(&self, world: World, index: &str, done: Callback<()>) {
        let index = index.to_string();
        self.submit(done, move |state| {
            state.ensure_connected()?;
            state
                .indexes
                .entry(world)
                .or_default()
                .entry(index)
                .or_default();
            Ok(())
        });
    }

    fn index_node(&self, index: &str, key: &str, node: NodeRef, done: Callback<()>) {
        let index = index.to_string();
        let key = key.to_string();
        self.submit(done, move |state| {
            state.node(node)?;
            let entries = state
                .indexes
                .get_mut(&node.world)
                .and_then(|tables| tables.get_mut(&index))
                .ok_or_else(|| GraphError::UnknownIndex(index.clone()))?;
            push_keyed(
                entries,
                KeyedEntry {
                    since: node.time,
                    key,
                    target: node.id,
                },
            );
            Ok(())
        });
    }

    fn query_index(
        &self,
        world: World,
        time: Time,
        index: &str,
        key: Option<&str>,
        done: Callback<Vec<NodeRef>>,
    ) {
        let index = index.to_string();
        let key = key.map(str::to_string);
        self.submit_read(done, move |state| {
            let entries = state.index(world, &index)?;
            Ok(visible_keyed(entries, time, key.as_deref())
                .into_iter()
                .map(|id| NodeRef::new(world, time, id))
                .collect())
        });
    }
}
