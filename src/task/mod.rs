//! Declarative store pipelines
//!
//! A [`Task`] is an immutable list of actions built with a fluent API and
//! executed asynchronously against a [`NodeStore`]. Each action waits for
//! the previous one's store operations to complete, so within one execution
//! every step sees the effects of the steps before it.
//!
//! The find-or-create idiom used by the ingestion pipeline:
//!
//! ```text
//! fromIndex(idx, key) ─► ensureUnique ─► ifThen(result empty, create) ─► defineVar(name)
//!                                              │
//!                                              └─► newNode ─► setProperty ─► indexNode
//! ```
//!
//! # Example
//!
//! ```
//! use powergraph::bridge::wait_for;
//! use powergraph::store::{MemoryStore, NodeStore, ValueType};
//! use powergraph::task::{Param, Task, TaskContext};
//! use std::sync::Arc;
//!
//! let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::inline());
//! wait_for(None, |cb| store.connect(cb)).unwrap();
//! wait_for(None, |cb| store.register_index(0, "byName", cb)).unwrap();
//!
//! let create = Task::new()
//!     .new_node()
//!     .set_property("name", ValueType::String, Param::var("name"))
//!     .index_node("byName", "name");
//! let upsert = Task::new()
//!     .from_index("byName", Param::var("name"))
//!     .if_then(|ctx| ctx.result().is_empty(), create)
//!     .define_var("node");
//!
//! let ctx = TaskContext::new(0, 1).with_var("name", "a.b.c");
//! let first = upsert.execute_blocking(Arc::clone(&store), ctx.clone(), None).unwrap();
//! let again = upsert.execute_blocking(Arc::clone(&store), ctx, None).unwrap();
//! assert_eq!(first.result_nodes(), again.result_nodes());
//! ```

mod action;
mod context;

pub use action::{Condition, Param};
pub use context::{Slot, TaskContext};

use crate::bridge::wait_for;
use crate::error::Result;
use crate::store::{Callback, NodeStore, ValueType, World};
use action::Action;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Clone, Default)]
pub struct Task {
    actions: Arc<Vec<Action>>,
}

impl Task {
    pub fn new() -> Self {
        Self::default()
    }

    fn then(mut self, action: Action) -> Self {
        Arc::make_mut(&mut self.actions).push(action);
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Move the context to the time `time` resolves to (a `Long`)
    pub fn set_time(self, time: Param) -> Self {
        self.then(Action::SetTime(time))
    }

    pub fn set_world(self, world: World) -> Self {
        self.then(Action::SetWorld(world))
    }

    /// Replace the result with a variable's content
    pub fn from_var(self, name: &str) -> Self {
        self.then(Action::FromVar(name.to_string()))
    }

    /// Bind the current result to a variable visible to later and nested steps
    pub fn define_var(self, name: &str) -> Self {
        self.then(Action::DefineVar(name.to_string()))
    }

    /// Nodes registered in a global index under `key`
    pub fn from_index(self, index: &str, key: Param) -> Self {
        self.then(Action::FromIndex {
            index: index.to_string(),
            key,
        })
    }

    /// Nodes keyed `key` in a keyed relation of each result node
    pub fn traverse_index(self, relation: &str, key: Param) -> Self {
        self.then(Action::TraverseIndex {
            relation: relation.to_string(),
            key,
        })
    }

    pub fn traverse(self, relation: &str) -> Self {
        self.then(Action::Traverse(relation.to_string()))
    }

    /// Fail with `IndexCorrupt` when a unique lookup returned several nodes
    pub fn ensure_unique(self, index: &str, key: Param) -> Self {
        self.then(Action::EnsureUnique {
            index: index.to_string(),
            key,
        })
    }

    /// Run `then` on the current context when `condition` holds
    ///
    /// The branch's result and variables carry over; world and time do not.
    pub fn if_then<F>(self, condition: F, then: Task) -> Self
    where
        F: Fn(&TaskContext) -> bool + Send + Sync + 'static,
    {
        self.then(Action::IfThen {
            condition: Arc::new(condition),
            then,
        })
    }

    pub fn sub_task(self, task: Task) -> Self {
        self.then(Action::SubTask(task))
    }

    pub fn new_node(self) -> Self {
        self.then(Action::NewNode(None))
    }

    pub fn new_typed_node(self, node_type: &str) -> Self {
        self.then(Action::NewNode(Some(node_type.to_string())))
    }

    /// Write a property on every result node at the node's time
    pub fn set_property(self, name: &str, value_type: ValueType, value: Param) -> Self {
        self.then(Action::SetProperty {
            name: name.to_string(),
            value_type,
            value,
        })
    }

    /// Replace the result with the current values of a property
    pub fn get(self, name: &str) -> Self {
        self.then(Action::Get(name.to_string()))
    }

    /// Register every result node in a global index keyed by its `attribute`
    pub fn index_node(self, index: &str, attribute: &str) -> Self {
        self.then(Action::IndexNode {
            index: index.to_string(),
            attribute: attribute.to_string(),
        })
    }

    /// Add the nodes of `var` to a keyed relation of every result node,
    /// keyed by each added node's `attribute`
    pub fn local_index(self, relation: &str, attribute: &str, var: &str) -> Self {
        self.then(Action::LocalIndex {
            relation: relation.to_string(),
            attribute: attribute.to_string(),
            var: var.to_string(),
        })
    }

    /// Add the nodes of `var` to a relation of every result node
    pub fn add(self, relation: &str, var: &str) -> Self {
        self.then(Action::Add {
            relation: relation.to_string(),
            var: var.to_string(),
        })
    }

    /// View the result nodes at another time
    pub fn jump(self, time: Param) -> Self {
        self.then(Action::Jump(time))
    }

    /// Run the task; `done` fires exactly once with the final context
    pub fn execute(&self, store: Arc<dyn NodeStore>, ctx: TaskContext, done: Callback<TaskContext>) {
        run(Arc::clone(&self.actions), 0, store, ctx, done);
    }

    /// Run the task and block on its completion through the sync bridge
    pub fn execute_blocking(
        &self,
        store: Arc<dyn NodeStore>,
        ctx: TaskContext,
        timeout: Option<Duration>,
    ) -> Result<TaskContext> {
        wait_for(timeout, |cb| self.execute(store, ctx, cb))
    }
}

fn run(
    actions: Arc<Vec<Action>>,
    step: usize,
    store: Arc<dyn NodeStore>,
    ctx: TaskContext,
    done: Callback<TaskContext>,
) {
    let Some(action) = actions.get(step) else {
        return done(Ok(ctx));
    };
    trace!(action = action.name(), step, time = ctx.time(), "Applying task action");

    let rest = Arc::clone(&actions);
    let store_next = Arc::clone(&store);
    action.apply(
        &store,
        ctx,
        Box::new(move |result| match result {
            Ok(ctx) => run(rest, step + 1, store_next, ctx, done),
            Err(e) => done(Err(e)),
        }),
    );
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(Action::name))
            .finish()
    }
}
