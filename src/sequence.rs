//! Diagnostic sequence ids for created nodes
//!
//! Every Method and Thread node carries a `debugID` drawn from a
//! process-wide counter when its creation step runs. The id is purely
//! diagnostic: it orders creations for debugging and lets the `Debug.id`
//! index address any node directly. Re-ingesting a sample never creates a
//! node twice, but a retried creation may still consume an id.
//!
//! # Example
//!
//! ```
//! use powergraph::sequence::SequenceGenerator;
//!
//! static SEQ: SequenceGenerator = SequenceGenerator::new();
//!
//! let a = SEQ.next_id();
//! let b = SEQ.next_id();
//! assert!(a < b);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free monotonically increasing counter
///
/// `next_id()` is a single atomic `fetch_add`, so the generator can be shared
/// across threads as a `static` or through an `Arc`.
#[derive(Debug)]
pub struct SequenceGenerator {
    counter: AtomicU64,
}

impl SequenceGenerator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Start counting at `initial_value`
    ///
    /// Useful when reopening a persisted graph whose ids already reached a
    /// known value.
    pub const fn with_value(initial_value: u64) -> Self {
        Self {
            counter: AtomicU64::new(initial_value),
        }
    }

    /// Take the next id
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Move the counter forward so the next id is at least `floor`
    pub fn advance_to(&self, floor: u64) {
        self.counter.fetch_max(floor, Ordering::SeqCst);
    }

    /// Value the next call to `next_id()` would return
    pub fn peek(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide generator used by the ingestion pipeline
pub static DEBUG_SEQUENCE: SequenceGenerator = SequenceGenerator::new();

/// Next diagnostic id rendered as the string stored on nodes
pub fn next_debug_id() -> String {
    DEBUG_SEQUENCE.next_id().to_string()
}
