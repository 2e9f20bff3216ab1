//! powergraph - time-versioned power attribution graph
//!
//! Per-thread power samples are attributed to a hierarchy
//! (measurement → method → thread → leaf) kept in a time-versioned node
//! store. Hierarchy nodes are materialized once per key by a declarative
//! upsert pipeline, every sample becomes a new version of a leaf value, and
//! per-method power is computed on read by aggregate nodes that sum their
//! child leaves.
//!
//! # Example
//!
//! ```
//! use powergraph::graph::Graph;
//! use powergraph::query::measurement_report;
//! use powergraph::reporter::GraphReporter;
//! use powergraph::sample::RawSample;
//! use powergraph::store::MemoryStore;
//! use std::sync::Arc;
//!
//! let reporter = GraphReporter::new(Graph::new(Arc::new(MemoryStore::inline())), "run");
//! reporter.connect().unwrap();
//! reporter.ingest(&[
//!     RawSample::cpu("a.b.c", "1", "0", 100, 3.0),
//!     RawSample::cpu("a.b.c", "2", "1", 100, 4.0),
//! ]).unwrap();
//!
//! let report = measurement_report(reporter.graph(), 0, "run", 100).unwrap().unwrap();
//! assert_eq!(report.method("a.b.c").unwrap().power, 7.0);
//! ```

pub mod aggregate;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod key_lock;
pub mod model;
pub mod node;
pub mod query;
pub mod reporter;
pub mod sample;
pub mod sequence;
pub mod store;
pub mod task;

pub use error::{GraphError, Result};
