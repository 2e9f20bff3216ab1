//! Ingestion entry point
//!
//! [`GraphReporter`] turns batches of raw samples into time versions of the
//! attribution graph. Each CPU sample runs one execution of the upsert
//! pipeline:
//!
//! ```text
//! Measurement ─find──────────────► (created by ensure_measurement)
//!     │
//!     └─method[name]─find-or-create─► Method ──► power, disk aggregates
//!            │
//!            └─thread[id]─find-or-create─► Thread ──► cpu leaf, disk leaf
//!                                            │         (children of the aggregates)
//!                                            ├─ cpuID rewritten when it changed
//!                                            └─ leaf values written at the timestamp
//! ```
//!
//! Disk samples are not attributed individually: their wattage is summed per
//! batch and that total is written to the disk leaf of every CPU sample's
//! thread in the same batch.
//!
//! The pipeline reads then conditionally creates. Concurrent callers sharing
//! a `(measurement, method)` key are serialized by a striped key lock held
//! until the execution completes in the store, even when the caller stopped
//! waiting for it; the thread key is nested inside the method key, so one
//! lock covers both levels.

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::key_lock::KeyLocks;
use crate::model::{aggregator, debug as dbg, measure, measurement, method, thread, GLOBAL_INDEXES};
use crate::sample::{RawSample, SampleKind};
use crate::sequence::DEBUG_SEQUENCE;
use crate::store::{Time, Value, World};
use crate::task::{Param, Slot, Task, TaskContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Time the measurement node is created at, before any sample
pub const ORIGIN: Time = Time::MIN;

mod var {
    pub const MEASUREMENT_ID: &str = "measurementID";
    pub const METHOD_NAME: &str = "methodName";
    pub const THREAD_ID: &str = "threadID";
    pub const CPU_ID: &str = "cpuID";
    pub const TIMESTAMP: &str = "timeStamp";
    pub const POWER: &str = "powerValue";
    pub const DISK: &str = "diskValue";

    pub const MEASUREMENT: &str = "measurement";
    pub const METHOD: &str = "method";
    pub const THREAD: &str = "thread";
    pub const POWER_AGG: &str = "powerAggregate";
    pub const DISK_AGG: &str = "diskAggregate";
    pub const CPU_LEAF: &str = "cpuLeaf";
    pub const DISK_LEAF: &str = "diskLeaf";
}

/// Outcome of one CPU sample that could not be recorded
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    /// Position of the sample in its batch
    pub index: usize,
    pub method_name: String,
    pub thread_id: String,
    pub timestamp: Time,
    pub error: GraphError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub cpu_samples: usize,
    pub disk_samples: usize,
    /// Wattage written to every disk leaf touched by the batch
    pub disk_total: f64,
    pub failures: Vec<SampleFailure>,
}

impl IngestReport {
    pub fn recorded(&self) -> usize {
        self.cpu_samples - self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn result_is_empty(ctx: &TaskContext) -> bool {
    ctx.result().is_empty()
}

/// Find-or-create of the measurement node, result bound to `measurement`
fn measurement_step() -> Task {
    let create = Task::new()
        .new_node()
        .set_property(
            measurement::ATT_ID,
            measurement::ATT_ID_TYPE,
            Param::var(var::MEASUREMENT_ID),
        )
        .index_node(measurement::IDX, measurement::ATT_ID);

    Task::new()
        .from_index(measurement::IDX, Param::var(var::MEASUREMENT_ID))
        .ensure_unique(measurement::IDX, Param::var(var::MEASUREMENT_ID))
        .if_then(result_is_empty, create)
        .define_var(var::MEASUREMENT)
}

/// Find-or-create of the method under `measurement`, bound to `method`
fn method_step() -> Task {
    let create = Task::new()
        .new_node()
        .define_var(var::METHOD)
        .set_property(method::ATT_NAME, method::ATT_NAME_TYPE, Param::var(var::METHOD_NAME))
        .set_property(dbg::ATT_ID, dbg::ATT_ID_TYPE, Param::NextDebugId)
        .index_node(dbg::IDX, dbg::ATT_ID)
        .new_typed_node(aggregator::NODE_TYPE)
        .define_var(var::POWER_AGG)
        .new_typed_node(aggregator::NODE_TYPE)
        .define_var(var::DISK_AGG)
        .from_var(var::METHOD)
        .add(method::REL_POWER, var::POWER_AGG)
        .add(method::REL_DISK, var::DISK_AGG)
        .from_var(var::MEASUREMENT)
        .local_index(measurement::REL_METHOD, method::ATT_NAME, var::METHOD)
        .from_var(var::METHOD);

    Task::new()
        .from_var(var::MEASUREMENT)
        .traverse_index(measurement::REL_METHOD, Param::var(var::METHOD_NAME))
        .ensure_unique(measurement::REL_METHOD, Param::var(var::METHOD_NAME))
        .if_then(result_is_empty, create)
        .define_var(var::METHOD)
}

/// Find-or-create of the thread under `method`, bound to `thread`
///
/// A new thread gets both leaves, attached to the method's aggregates in
/// the same execution.
fn thread_step() -> Task {
    let create = Task::new()
        .new_node()
        .define_var(var::THREAD)
        .set_property(thread::ATT_THREAD_ID, thread::ATT_THREAD_ID_TYPE, Param::var(var::THREAD_ID))
        .set_property(dbg::ATT_ID, dbg::ATT_ID_TYPE, Param::NextDebugId)
        .index_node(dbg::IDX, dbg::ATT_ID)
        .new_typed_node(measure::NODE_TYPE)
        .define_var(var::CPU_LEAF)
        .new_typed_node(measure::NODE_TYPE)
        .define_var(var::DISK_LEAF)
        .from_var(var::THREAD)
        .add(thread::REL_CPU_MEASURE, var::CPU_LEAF)
        .add(thread::REL_DISK_MEASURE, var::DISK_LEAF)
        .from_var(var::METHOD)
        .traverse(method::REL_POWER)
        .add(aggregator::REL_CHILD, var::CPU_LEAF)
        .from_var(var::METHOD)
        .traverse(method::REL_DISK)
        .add(aggregator::REL_CHILD, var::DISK_LEAF)
        .from_var(var::METHOD)
        .local_index(method::REL_THREAD, thread::ATT_THREAD_ID, var::THREAD)
        .from_var(var::THREAD);

    Task::new()
        .from_var(var::METHOD)
        .traverse_index(method::REL_THREAD, Param::var(var::THREAD_ID))
        .ensure_unique(method::REL_THREAD, Param::var(var::THREAD_ID))
        .if_then(result_is_empty, create)
        .define_var(var::THREAD)
}

/// Rewrite the thread's cpu id only when the observed core changed
fn cpu_step() -> Task {
    let rewrite = Task::new().from_var(var::THREAD).set_property(
        thread::ATT_CPU_ID,
        thread::ATT_CPU_ID_TYPE,
        Param::var(var::CPU_ID),
    );

    Task::new()
        .from_var(var::THREAD)
        .get(thread::ATT_CPU_ID)
        .if_then(
            |ctx| {
                let current = ctx.result().first().and_then(Slot::as_value);
                current != ctx.var_value(var::CPU_ID).ok()
            },
            rewrite,
        )
}

/// Both leaf writes at the sample's timestamp
fn leaf_step() -> Task {
    Task::new()
        .from_var(var::THREAD)
        .traverse(thread::REL_CPU_MEASURE)
        .jump(Param::var(var::TIMESTAMP))
        .set_property(measure::ATT_VALUE, measure::ATT_VALUE_TYPE, Param::var(var::POWER))
        .from_var(var::THREAD)
        .traverse(thread::REL_DISK_MEASURE)
        .jump(Param::var(var::TIMESTAMP))
        .set_property(measure::ATT_VALUE, measure::ATT_VALUE_TYPE, Param::var(var::DISK))
}

/// The full per-sample pipeline
pub fn sample_pipeline() -> Task {
    Task::new()
        .set_time(Param::var(var::TIMESTAMP))
        .sub_task(measurement_step())
        .sub_task(method_step())
        .sub_task(thread_step())
        .sub_task(cpu_step())
        .sub_task(leaf_step())
}

pub struct GraphReporter {
    graph: Graph,
    measurement: String,
    world: World,
    pipeline: Task,
    locks: Arc<KeyLocks>,
    measured: AtomicBool,
}

impl GraphReporter {
    pub fn new(graph: Graph, measurement: &str) -> Self {
        Self {
            graph,
            measurement: measurement.to_string(),
            world: 0,
            pipeline: sample_pipeline(),
            locks: Arc::new(KeyLocks::default()),
            measured: AtomicBool::new(false),
        }
    }

    /// Reporter over a fresh [`crate::store::MemoryStore`] built from `config`
    pub fn from_config(config: &GraphConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(Graph::from_config(config)?, &config.measurement)
            .with_world(config.world)
            .with_locks(Arc::new(KeyLocks::new(config.lock_stripes))))
    }

    pub fn with_world(mut self, world: World) -> Self {
        self.world = world;
        self
    }

    /// Share creation locks with other reporters on the same store
    pub fn with_locks(mut self, locks: Arc<KeyLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn world(&self) -> World {
        self.world
    }

    /// Connect the store and register the global indexes
    ///
    /// Nothing is written to the graph: reading a measurement that does not
    /// exist stays a miss. Ingestion creates it through
    /// [`GraphReporter::ensure_measurement`].
    pub fn connect(&self) -> Result<()> {
        self.graph.connect()?;
        for index in GLOBAL_INDEXES {
            self.graph.register_index(self.world, index)?;
        }
        self.resume_debug_sequence()?;
        self.measured.store(false, Ordering::Release);
        info!(measurement = %self.measurement, "Reporter connected");
        Ok(())
    }

    /// Find or create the measurement node at [`ORIGIN`]
    ///
    /// Runs the store once per connection; later calls return immediately.
    pub fn ensure_measurement(&self) -> Result<()> {
        if self.measured.load(Ordering::Acquire) {
            return Ok(());
        }
        let ctx = TaskContext::new(self.world, ORIGIN)
            .with_var(var::MEASUREMENT_ID, self.measurement.as_str());
        let out = self.run_locked(&measurement_step(), &self.measurement, ctx)?;
        let node = out.var_nodes(var::MEASUREMENT)?.first().map(|n| n.id);
        self.measured.store(true, Ordering::Release);
        debug!(measurement = %self.measurement, node = ?node, "Measurement ready");
        Ok(())
    }

    /// Execute `task` while holding `key`
    ///
    /// The guard rides in the completion callback. A wait that times out
    /// leaves the key held until the orphaned execution ends, so the next
    /// writer on the key sees its nodes instead of racing it.
    fn run_locked(&self, task: &Task, key: &str, ctx: TaskContext) -> Result<TaskContext> {
        let guard = self.locks.acquire(key, self.graph.timeout())?;
        let store = Arc::clone(self.graph.store());
        self.graph.wait(|done| {
            task.execute(
                store,
                ctx,
                Box::new(move |result| {
                    drop(guard);
                    done(result)
                }),
            )
        })
    }

    /// Move the diagnostic sequence past every id a reloaded graph holds
    fn resume_debug_sequence(&self) -> Result<()> {
        let mut highest = None;
        for node in self.graph.find_all(self.world, Time::MAX, dbg::IDX)? {
            let id = self
                .graph
                .get(node, dbg::ATT_ID)?
                .and_then(|v| v.as_str().and_then(|s| s.parse::<u64>().ok()));
            highest = highest.max(id);
        }
        if let Some(highest) = highest {
            DEBUG_SEQUENCE.advance_to(highest + 1);
        }
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.graph.disconnect()?;
        info!(measurement = %self.measurement, "Reporter disconnected");
        Ok(())
    }

    /// Record one batch
    ///
    /// A failing sample is logged and reported without aborting the rest of
    /// the batch. The store is saved once at the end; only that save, or a
    /// measurement that cannot be created, fails the call.
    pub fn ingest(&self, samples: &[RawSample]) -> Result<IngestReport> {
        self.ensure_measurement()?;
        let mut report = IngestReport::default();
        for sample in samples.iter().filter(|s| s.kind == SampleKind::Disk) {
            report.disk_samples += 1;
            report.disk_total += sample.watts;
        }

        for (index, sample) in samples.iter().enumerate() {
            if sample.kind != SampleKind::Cpu {
                continue;
            }
            report.cpu_samples += 1;
            if let Err(error) = self.record(sample, report.disk_total) {
                warn!(
                    method = %sample.method_name,
                    thread = %sample.thread_id,
                    timestamp = sample.timestamp,
                    error = %error,
                    "Sample not recorded"
                );
                report.failures.push(SampleFailure {
                    index,
                    method_name: sample.method_name.clone(),
                    thread_id: sample.thread_id.clone(),
                    timestamp: sample.timestamp,
                    error,
                });
            }
        }

        self.graph.save()?;
        debug!(
            cpu = report.cpu_samples,
            disk = report.disk_samples,
            disk_total = report.disk_total,
            failed = report.failures.len(),
            "Batch ingested"
        );
        Ok(report)
    }

    /// Run the pipeline for one CPU sample with the batch's disk total
    ///
    /// Non-finite wattage is rejected before the store is touched; it could
    /// not be written to a snapshot and read back.
    pub fn record(&self, sample: &RawSample, disk_total: f64) -> Result<()> {
        for (what, watts) in [("power", sample.watts), ("disk total", disk_total)] {
            if !watts.is_finite() {
                return Err(GraphError::InvalidSample(format!(
                    "{} of {} is not a finite wattage",
                    what, watts
                )));
            }
        }
        let ctx = TaskContext::new(self.world, sample.timestamp)
            .with_var(var::MEASUREMENT_ID, self.measurement.as_str())
            .with_var(var::METHOD_NAME, sample.method_name.as_str())
            .with_var(var::THREAD_ID, sample.thread_id.as_str())
            .with_var(var::CPU_ID, sample.cpu_id.as_str())
            .with_var(var::TIMESTAMP, Value::Long(sample.timestamp))
            .with_var(var::POWER, Value::Double(sample.watts))
            .with_var(var::DISK, Value::Double(disk_total));

        let key = format!("{}/{}", self.measurement, sample.method_name);
        self.run_locked(&self.pipeline, &key, ctx)?;
        debug!(
            method = %sample.method_name,
            thread = %sample.thread_id,
            timestamp = sample.timestamp,
            watts = sample.watts,
            "Sample recorded"
        );
        Ok(())
    }
}
