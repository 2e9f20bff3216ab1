//! Read path over the attribution graph
//!
//! A report is a snapshot of one measurement at one point in time: every
//! method visible then, with its aggregate power and disk values, and every
//! thread of each method with its own leaf values. Aggregates are computed
//! on read, so a report never sees a cached sum.

use crate::aggregate::AggregateNode;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::model::{debug as dbg, measurement, method, thread};
use crate::node::{LeafNode, Readable};
use crate::sample::SampleKind;
use crate::store::{NodeRef, Time, World};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementReport {
    pub measurement_id: String,
    pub time: Time,
    pub methods: Vec<MethodReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_id: Option<String>,
    pub power: f64,
    pub disk: f64,
    pub threads: Vec<ThreadReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadReport {
    pub thread_id: String,
    pub cpu_id: Option<String>,
    pub cpu: f64,
    pub disk: f64,
}

impl MeasurementReport {
    pub fn method(&self, name: &str) -> Option<&MethodReport> {
        self.methods.iter().find(|m| m.name == name)
    }
}

impl MethodReport {
    pub fn thread(&self, thread_id: &str) -> Option<&ThreadReport> {
        self.threads.iter().find(|t| t.thread_id == thread_id)
    }
}

fn unique(found: Vec<NodeRef>, index: &str, key: &str) -> Result<Option<NodeRef>> {
    match found.len() {
        0 | 1 => Ok(found.into_iter().next()),
        n => Err(GraphError::IndexCorrupt {
            index: index.to_string(),
            key: key.to_string(),
            found: n,
        }),
    }
}

fn single(graph: &Graph, node: NodeRef, relation: &str) -> Result<Option<NodeRef>> {
    Ok(graph.relation(node, relation)?.into_iter().next())
}

fn string_attribute(graph: &Graph, node: NodeRef, name: &str) -> Result<Option<String>> {
    Ok(graph
        .get(node, name)?
        .and_then(|v| v.as_str().map(str::to_string)))
}

/// Measurement node visible at `time`
pub fn find_measurement(
    graph: &Graph,
    world: World,
    measurement_id: &str,
    time: Time,
) -> Result<Option<NodeRef>> {
    let found = graph.find(world, time, measurement::IDX, measurement_id)?;
    unique(found, measurement::IDX, measurement_id)
}

/// Thread node of a method visible at `time`
pub fn find_thread(
    graph: &Graph,
    world: World,
    measurement_id: &str,
    method_name: &str,
    thread_id: &str,
    time: Time,
) -> Result<Option<NodeRef>> {
    let Some(root) = find_measurement(graph, world, measurement_id, time)? else {
        return Ok(None);
    };
    let methods = graph.keyed(root, measurement::REL_METHOD, Some(method_name))?;
    let Some(method) = unique(methods, measurement::REL_METHOD, method_name)? else {
        return Ok(None);
    };
    let threads = graph.keyed(method, method::REL_THREAD, Some(thread_id))?;
    unique(threads, method::REL_THREAD, thread_id)
}

fn leaf_relation(kind: SampleKind) -> &'static str {
    match kind {
        SampleKind::Cpu => thread::REL_CPU_MEASURE,
        SampleKind::Disk => thread::REL_DISK_MEASURE,
    }
}

fn aggregate_value(graph: &Graph, method: NodeRef, relation: &str) -> Result<f64> {
    match single(graph, method, relation)? {
        Some(agg) => AggregateNode::new(graph.clone(), agg).value(),
        None => Ok(0.0),
    }
}

fn leaf_read(graph: &Graph, thread: NodeRef, kind: SampleKind) -> Result<f64> {
    let relation = leaf_relation(kind);
    let leaf = single(graph, thread, relation)?.ok_or_else(|| GraphError::MissingValue {
        node: thread.id,
        attribute: relation.to_string(),
        time: thread.time,
    })?;
    LeafNode::new(graph.clone(), leaf).value()
}

/// Every recorded version of one thread's leaf, oldest first
///
/// `Ok(None)` when the thread was never observed.
pub fn leaf_history(
    graph: &Graph,
    world: World,
    measurement_id: &str,
    method_name: &str,
    thread_id: &str,
    kind: SampleKind,
) -> Result<Option<Vec<(Time, f64)>>> {
    let Some(thread) = find_thread(graph, world, measurement_id, method_name, thread_id, Time::MAX)?
    else {
        return Ok(None);
    };
    match single(graph, thread, leaf_relation(kind))? {
        Some(leaf) => LeafNode::new(graph.clone(), leaf).history().map(Some),
        None => Ok(Some(Vec::new())),
    }
}

/// Every version of a thread's cpu id, oldest first
pub fn cpu_id_history(graph: &Graph, thread: NodeRef) -> Result<Vec<(Time, String)>> {
    Ok(graph
        .history(thread, thread::ATT_CPU_ID)?
        .into_iter()
        .filter_map(|(t, v)| v.as_str().map(|s| (t, s.to_string())))
        .collect())
}

/// Methods and threads of a measurement as they stood at `time`
///
/// `Ok(None)` when the measurement does not exist. A leaf without a version
/// at `time` fails the whole report with `MissingValue`.
pub fn measurement_report(
    graph: &Graph,
    world: World,
    measurement_id: &str,
    time: Time,
) -> Result<Option<MeasurementReport>> {
    let Some(root) = find_measurement(graph, world, measurement_id, time)? else {
        return Ok(None);
    };

    let mut methods = Vec::new();
    for node in graph.keyed(root, measurement::REL_METHOD, None)? {
        let mut threads = Vec::new();
        for t in graph.keyed(node, method::REL_THREAD, None)? {
            threads.push(ThreadReport {
                thread_id: string_attribute(graph, t, thread::ATT_THREAD_ID)?.unwrap_or_default(),
                cpu_id: string_attribute(graph, t, thread::ATT_CPU_ID)?,
                cpu: leaf_read(graph, t, SampleKind::Cpu)?,
                disk: leaf_read(graph, t, SampleKind::Disk)?,
            });
        }
        threads.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));

        methods.push(MethodReport {
            name: string_attribute(graph, node, method::ATT_NAME)?.unwrap_or_default(),
            debug_id: string_attribute(graph, node, dbg::ATT_ID)?,
            power: aggregate_value(graph, node, method::REL_POWER)?,
            disk: aggregate_value(graph, node, method::REL_DISK)?,
            threads,
        });
    }
    methods.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Some(MeasurementReport {
        measurement_id: measurement_id.to_string(),
        time,
        methods,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::GraphReporter;
    use crate::sample::RawSample;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn reporter() -> GraphReporter {
        let reporter = GraphReporter::new(Graph::new(Arc::new(MemoryStore::inline())), "run");
        reporter.connect().unwrap();
        reporter.ensure_measurement().unwrap();
        reporter
    }

    #[test]
    fn test_unknown_measurement() {
        let reporter = reporter();
        assert_eq!(measurement_report(reporter.graph(), 0, "other", 10).unwrap(), None);
    }

    #[test]
    fn test_empty_measurement() {
        let reporter = reporter();
        let report = measurement_report(reporter.graph(), 0, "run", 10).unwrap().unwrap();
        assert!(report.methods.is_empty());
    }

    #[test]
    fn test_report_before_first_sample_is_empty() {
        let reporter = reporter();
        reporter
            .ingest(&[RawSample::cpu("m", "1", "0", 100, 4.0)])
            .unwrap();
        let early = measurement_report(reporter.graph(), 0, "run", 99).unwrap().unwrap();
        assert!(early.methods.is_empty());

        let late = measurement_report(reporter.graph(), 0, "run", 100).unwrap().unwrap();
        let m = late.method("m").unwrap();
        assert_eq!(m.power, 4.0);
        assert_eq!(m.disk, 0.0);
        assert!(m.debug_id.is_some());
        let t = m.thread("1").unwrap();
        assert_eq!((t.cpu, t.disk), (4.0, 0.0));
        assert_eq!(t.cpu_id.as_deref(), Some("0"));
    }

    #[test]
    fn test_leaf_history_of_unknown_thread() {
        let reporter = reporter();
        let history =
            leaf_history(reporter.graph(), 0, "run", "m", "1", SampleKind::Cpu).unwrap();
        assert_eq!(history, None);
    }

    #[test]
    fn test_report_serializes() {
        let reporter = reporter();
        reporter
            .ingest(&[RawSample::cpu("m", "1", "0", 5, 1.0)])
            .unwrap();
        let report = measurement_report(reporter.graph(), 0, "run", 5).unwrap().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["methods"][0]["name"], "m");
        assert_eq!(json["methods"][0]["threads"][0]["cpu"], 1.0);
    }
}
