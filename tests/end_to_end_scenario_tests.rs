//! End-to-end attribution scenario
//!
//! Three batches over two methods and three threads:
//!
//! ```text
//! batch 1 @12344  a.b.b/10 cpu0 10W              disk 20W
//! batch 2 @12345  a.b.b/10 cpu0 11W  w.x.y/11 cpu1 10W  disk 8W
//! batch 3 @12346  w.x.y/12 cpu0 1W               disk 1W
//! ```

use powergraph::graph::Graph;
use powergraph::model::{debug, measurement, method};
use powergraph::query::{self, measurement_report};
use powergraph::reporter::GraphReporter;
use powergraph::sample::{RawSample, SampleKind};
use powergraph::store::MemoryStore;
use std::sync::Arc;

const RUN: &str = "scenario";

fn batches() -> Vec<Vec<RawSample>> {
    vec![
        vec![
            RawSample::cpu("a.b.b", "10", "0", 12344, 10.0),
            RawSample::disk("a.b.b", "10", 12344, 20.0),
        ],
        vec![
            RawSample::cpu("a.b.b", "10", "0", 12345, 11.0),
            RawSample::cpu("w.x.y", "11", "1", 12345, 10.0),
            RawSample::disk("w.x.y", "11", 12345, 8.0),
        ],
        vec![
            RawSample::cpu("w.x.y", "12", "0", 12346, 1.0),
            RawSample::disk("w.x.y", "12", 12346, 1.0),
        ],
    ]
}

fn ingested() -> (Arc<MemoryStore>, GraphReporter) {
    let store = Arc::new(MemoryStore::inline());
    let reporter = GraphReporter::new(Graph::new(store.clone()), RUN);
    reporter.connect().unwrap();
    for batch in batches() {
        let report = reporter.ingest(&batch).unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
    }
    (store, reporter)
}

#[test]
fn test_two_methods_and_their_threads() {
    let (_, reporter) = ingested();
    let report = measurement_report(reporter.graph(), 0, RUN, 12346)
        .unwrap()
        .unwrap();

    let names: Vec<_> = report.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["a.b.b", "w.x.y"]);

    let abb = report.method("a.b.b").unwrap();
    let threads: Vec<_> = abb.threads.iter().map(|t| t.thread_id.as_str()).collect();
    assert_eq!(threads, ["10"]);

    let wxy = report.method("w.x.y").unwrap();
    let threads: Vec<_> = wxy.threads.iter().map(|t| t.thread_id.as_str()).collect();
    assert_eq!(threads, ["11", "12"]);
}

#[test]
fn test_cpu_leaf_history() {
    let (_, reporter) = ingested();
    let history = query::leaf_history(reporter.graph(), 0, RUN, "a.b.b", "10", SampleKind::Cpu)
        .unwrap()
        .unwrap();
    assert_eq!(history, vec![(12344, 10.0), (12345, 11.0)]);
}

#[test]
fn test_disk_leaf_takes_batch_total() {
    let (_, reporter) = ingested();
    let history = query::leaf_history(reporter.graph(), 0, RUN, "a.b.b", "10", SampleKind::Disk)
        .unwrap()
        .unwrap();
    assert_eq!(history, vec![(12344, 20.0), (12345, 8.0)]);
}

#[test]
fn test_aggregate_power_at_last_batch() {
    let (_, reporter) = ingested();
    let report = measurement_report(reporter.graph(), 0, RUN, 12346)
        .unwrap()
        .unwrap();
    let wxy = report.method("w.x.y").unwrap();
    assert_eq!(wxy.power, 11.0);
    assert_eq!(wxy.disk, 9.0);
    assert_eq!(report.method("a.b.b").unwrap().power, 11.0);
}

#[test]
fn test_aggregate_follows_query_time() {
    let (_, reporter) = ingested();
    let at = |time| {
        measurement_report(reporter.graph(), 0, RUN, time)
            .unwrap()
            .unwrap()
    };

    assert_eq!(at(12344).method("a.b.b").unwrap().power, 10.0);
    assert!(at(12344).method("w.x.y").is_none());
    // Thread 12 does not exist yet at 12345
    let wxy = at(12345);
    let wxy = wxy.method("w.x.y").unwrap();
    assert_eq!(wxy.power, 10.0);
    assert_eq!(wxy.threads.len(), 1);
    assert!(at(12343).methods.is_empty());
}

#[test]
fn test_pinned_thread_keeps_one_cpu_version() {
    let (_, reporter) = ingested();
    let thread = query::find_thread(reporter.graph(), 0, RUN, "a.b.b", "10", i64::MAX)
        .unwrap()
        .unwrap();
    let versions = query::cpu_id_history(reporter.graph(), thread).unwrap();
    assert_eq!(versions, vec![(12344, "0".to_string())]);
}

#[test]
fn test_core_change_adds_cpu_version() {
    let (_, reporter) = ingested();
    reporter
        .ingest(&[RawSample::cpu("w.x.y", "11", "3", 12347, 2.0)])
        .unwrap();
    let thread = query::find_thread(reporter.graph(), 0, RUN, "w.x.y", "11", i64::MAX)
        .unwrap()
        .unwrap();
    let versions = query::cpu_id_history(reporter.graph(), thread).unwrap();
    assert_eq!(
        versions,
        vec![(12345, "1".to_string()), (12347, "3".to_string())]
    );
}

#[test]
fn test_reingest_is_structurally_idempotent() {
    let (store, reporter) = ingested();
    // measurement + 2 × (method + 2 aggregates) + 3 × (thread + 2 leaves)
    assert_eq!(store.node_count(), 16);

    for batch in batches() {
        reporter.ingest(&batch).unwrap();
    }
    assert_eq!(store.node_count(), 16);

    let graph = reporter.graph();
    let root = graph.find(0, i64::MAX, measurement::IDX, RUN).unwrap();
    assert_eq!(root.len(), 1);
    let methods = graph.keyed(root[0], measurement::REL_METHOD, None).unwrap();
    assert_eq!(methods.len(), 2);
    for m in methods {
        assert_eq!(graph.relation(m, method::REL_POWER).unwrap().len(), 1);
        assert_eq!(graph.relation(m, method::REL_DISK).unwrap().len(), 1);
    }
}

#[test]
fn test_methods_and_threads_get_debug_ids() {
    let (_, reporter) = ingested();
    let ids = reporter.graph().find_all(0, i64::MAX, debug::IDX).unwrap();
    assert_eq!(ids.len(), 5);
}

#[test]
fn test_out_of_order_sample_reuses_nodes() {
    let (store, reporter) = ingested();
    let report = reporter
        .ingest(&[RawSample::cpu("a.b.b", "10", "0", 12300, 7.0)])
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(store.node_count(), 16);

    let history = query::leaf_history(reporter.graph(), 0, RUN, "a.b.b", "10", SampleKind::Cpu)
        .unwrap()
        .unwrap();
    assert_eq!(history, vec![(12300, 7.0), (12344, 10.0), (12345, 11.0)]);
}
