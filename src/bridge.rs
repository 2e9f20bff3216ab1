//! Sync bridge: block a synchronous caller on asynchronous completions
//!
//! [`DeferCounter`] is a counting latch. It is created with the number of
//! completions the caller expects; every callback handed out by
//! [`DeferCounter::wrap`] counts down once, success or failure. The caller
//! blocks in [`DeferCounter::wait_result`] (or [`DeferCounter::wait_all`])
//! until the count reaches zero or the timeout expires.
//!
//! ```text
//!   caller thread                    store workers
//!   ─────────────                    ─────────────
//!   counter = DeferCounter::new(2)
//!   store.op_a(counter.wrap())  ───► op_a ─► cb(Ok(a))  ─┐
//!   store.op_b(counter.wrap())  ───► op_b ─► cb(Ok(b))  ─┤ channel
//!   counter.wait_result(timeout) ◄──────────────────────┘
//!     = Ok(Some(b))   (last registered)
//! ```
//!
//! A timeout, or every outstanding callback being dropped without firing,
//! surfaces as [`GraphError::StoreUnavailable`].

use crate::error::{GraphError, Result};
use crate::store::Callback;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Counting latch bridging callbacks to a blocking wait
pub struct DeferCounter<T> {
    expected: usize,
    sender: Sender<Result<T>>,
    receiver: Receiver<Result<T>>,
}

impl<T: Send + 'static> DeferCounter<T> {
    /// Latch released after `expected` completions
    pub fn new(expected: usize) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            expected,
            sender,
            receiver,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Callback that registers one completion with this latch
    pub fn wrap(&self) -> Callback<T> {
        let sender = self.sender.clone();
        Box::new(move |result| {
            // The waiter may have timed out and gone away
            let _ = sender.send(result);
        })
    }

    /// Block until every expected completion arrived
    ///
    /// Returns the results in completion order, or the first failure once
    /// all completions are in.
    pub fn wait_all(self, timeout: Option<Duration>) -> Result<Vec<T>> {
        let DeferCounter {
            expected,
            sender,
            receiver,
        } = self;
        // Only handed-out callbacks keep the channel open from here on
        drop(sender);

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut values = Vec::with_capacity(expected);
        let mut failure = None;

        for received in 0..expected {
            let next = match deadline {
                Some(deadline) => receiver.recv_deadline(deadline).map_err(|e| match e {
                    RecvTimeoutError::Timeout => GraphError::StoreUnavailable(format!(
                        "Timed out after {:?} with {} of {} completions",
                        timeout.unwrap_or_default(),
                        received,
                        expected
                    )),
                    RecvTimeoutError::Disconnected => dropped(received, expected),
                }),
                None => receiver.recv().map_err(|_| dropped(received, expected)),
            }?;

            match next {
                Ok(value) => values.push(value),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    /// Block until the count reaches zero; yields the last registered result
    pub fn wait_result(self, timeout: Option<Duration>) -> Result<Option<T>> {
        Ok(self.wait_all(timeout)?.pop())
    }
}

fn dropped(received: usize, expected: usize) -> GraphError {
    GraphError::StoreUnavailable(format!(
        "Operation dropped without completing ({} of {} completions)",
        received, expected
    ))
}

/// Run a single asynchronous operation and block on its completion
///
/// ```
/// use powergraph::bridge::wait_for;
/// use powergraph::store::{MemoryStore, NodeStore};
///
/// let store = MemoryStore::inline();
/// wait_for(None, |cb| store.connect(cb)).unwrap();
/// let node = wait_for(None, |cb| store.create_node(0, 12, None, cb)).unwrap();
/// assert_eq!(node.time, 12);
/// ```
pub fn wait_for<T, F>(timeout: Option<Duration>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Callback<T>),
{
    let counter = DeferCounter::new(1);
    op(counter.wrap());
    counter
        .wait_result(timeout)?
        .ok_or_else(|| dropped(0, 1))
}
