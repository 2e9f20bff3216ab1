//! Names of the attribution hierarchy
//!
//! ```text
//! Measurement ──method[name]──► Method ──power──► PowerAggregator ──child──┐
//!                                  │   ──disk───► PowerAggregator ──child──┤
//!                                  └──thread[threadID]──► Thread           │
//!                                                          ├─cpuMeasure──► Measure (leaf)
//!                                                          └─diskMeasure─► Measure (leaf)
//! ```
//!
//! Both aggregates of a Method hold non-owning `child` references to the
//! leaves its Threads own.

pub mod measurement {
    use crate::store::ValueType;

    /// Global index of measurements by id
    pub const IDX: &str = "Measurement.measurementID";
    pub const ATT_ID: &str = "measurementID";
    pub const ATT_ID_TYPE: ValueType = ValueType::String;
    /// Keyed relation to methods, keyed by method name
    pub const REL_METHOD: &str = "method";
}

pub mod method {
    use crate::store::ValueType;

    pub const ATT_NAME: &str = "name";
    pub const ATT_NAME_TYPE: ValueType = ValueType::String;
    pub const REL_POWER: &str = "power";
    pub const REL_DISK: &str = "disk";
    /// Keyed relation to threads, keyed by thread id
    pub const REL_THREAD: &str = "thread";
}

pub mod thread {
    use crate::store::ValueType;

    pub const ATT_THREAD_ID: &str = "threadID";
    pub const ATT_THREAD_ID_TYPE: ValueType = ValueType::String;
    /// Core the thread was last observed on, versioned on change only
    pub const ATT_CPU_ID: &str = "cpuID";
    pub const ATT_CPU_ID_TYPE: ValueType = ValueType::String;
    pub const REL_CPU_MEASURE: &str = "cpuMeasure";
    pub const REL_DISK_MEASURE: &str = "diskMeasure";
}

pub mod measure {
    use crate::store::ValueType;

    pub const NODE_TYPE: &str = "Measure";
    pub const ATT_VALUE: &str = "value";
    pub const ATT_VALUE_TYPE: ValueType = ValueType::Double;
}

pub mod aggregator {
    pub const NODE_TYPE: &str = "PowerAggregator";
    /// The single readable, derived attribute
    pub const ATT_VALUE: &str = "value";
    pub const REL_CHILD: &str = "child";
}

pub mod debug {
    use crate::store::ValueType;

    /// Global index of diagnostic ids
    pub const IDX: &str = "Debug.id";
    pub const ATT_ID: &str = "debugID";
    pub const ATT_ID_TYPE: ValueType = ValueType::String;
}

/// Global indexes the reporter registers on connect
pub const GLOBAL_INDEXES: [&str; 2] = [measurement::IDX, debug::IDX];
