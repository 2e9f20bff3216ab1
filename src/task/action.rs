//! Task actions and their asynchronous application
//!
//! Each action consumes the context, issues zero or more store operations
//! and hands the updated context to `next` exactly once. Actions over a
//! multi-node result fan out one operation per node and resume when every
//! operation has completed.
//!
//! Structural reads (index lookups, relation traversal) probe every entry
//! ever added, whatever the context time, then rebase the found nodes to the
//! context time. An out-of-order sample therefore reuses the node a later
//! sample created instead of creating a duplicate. Property reads and writes
//! stay at the context time.

use super::context::{Slot, TaskContext};
use super::Task;
use crate::error::{GraphError, Result};
use crate::sequence::next_debug_id;
use crate::store::{Callback, NodeRef, NodeStore, Time, Value, ValueType, World};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Predicate deciding whether an `if_then` branch runs
pub type Condition = Arc<dyn Fn(&TaskContext) -> bool + Send + Sync>;

const LATEST: Time = Time::MAX;

/// Argument resolved against the context when the action runs
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Literal(Value),
    Var(String),
    /// Fresh diagnostic id from the process-wide sequence
    NextDebugId,
}

impl Param {
    pub fn lit(value: impl Into<Value>) -> Self {
        Param::Literal(value.into())
    }

    pub fn var(name: &str) -> Self {
        Param::Var(name.to_string())
    }

    pub fn resolve(&self, ctx: &TaskContext) -> Result<Value> {
        match self {
            Param::Literal(value) => Ok(value.clone()),
            Param::Var(name) => ctx.var_value(name).cloned(),
            Param::NextDebugId => Ok(Value::String(next_debug_id())),
        }
    }

    fn resolve_time(&self, ctx: &TaskContext) -> Result<Time> {
        match self.resolve(ctx)? {
            Value::Long(time) => Ok(time),
            other => Err(GraphError::TypeMismatch {
                attribute: "time".to_string(),
                expected: ValueType::Long,
                found: other.value_type(),
            }),
        }
    }

    fn resolve_key(&self, ctx: &TaskContext) -> Result<String> {
        Ok(self.resolve(ctx)?.index_key())
    }
}

#[derive(Clone)]
pub(crate) enum Action {
    SetTime(Param),
    SetWorld(World),
    FromVar(String),
    DefineVar(String),
    FromIndex { index: String, key: Param },
    TraverseIndex { relation: String, key: Param },
    Traverse(String),
    EnsureUnique { index: String, key: Param },
    IfThen { condition: Condition, then: Task },
    SubTask(Task),
    NewNode(Option<String>),
    SetProperty { name: String, value_type: ValueType, value: Param },
    Get(String),
    IndexNode { index: String, attribute: String },
    LocalIndex { relation: String, attribute: String, var: String },
    Add { relation: String, var: String },
    Jump(Param),
}

macro_rules! or_fail {
    ($result:expr, $next:ident) => {
        match $result {
            Ok(value) => value,
            Err(e) => return $next(Err(e)),
        }
    };
}

/// Resume the task with `update` applied once the operation succeeded
fn resume<T, F>(mut ctx: TaskContext, next: Callback<TaskContext>, update: F) -> Callback<T>
where
    T: Send + 'static,
    F: FnOnce(&mut TaskContext, T) + Send + 'static,
{
    Box::new(move |result| match result {
        Ok(value) => {
            update(&mut ctx, value);
            next(Ok(ctx))
        }
        Err(e) => next(Err(e)),
    })
}

struct GatherState<T> {
    remaining: usize,
    values: Vec<Option<T>>,
    failure: Option<GraphError>,
    done: Option<Callback<Vec<T>>>,
}

/// `count` callbacks that together complete `done` with values in order
fn gather<T: Send + 'static>(count: usize, done: Callback<Vec<T>>) -> Vec<Callback<T>> {
    if count == 0 {
        done(Ok(Vec::new()));
        return Vec::new();
    }

    let state = Arc::new(Mutex::new(GatherState {
        remaining: count,
        values: (0..count).map(|_| None).collect(),
        failure: None,
        done: Some(done),
    }));

    (0..count)
        .map(|index| {
            let state = Arc::clone(&state);
            Box::new(move |result: Result<T>| {
                let finished = {
                    let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
                    match result {
                        Ok(value) => s.values[index] = Some(value),
                        Err(e) => {
                            s.failure.get_or_insert(e);
                        }
                    }
                    s.remaining -= 1;
                    if s.remaining == 0 {
                        let values = std::mem::take(&mut s.values);
                        s.done.take().map(|done| (done, s.failure.take(), values))
                    } else {
                        None
                    }
                };
                // Completion runs outside the lock
                if let Some((done, failure, values)) = finished {
                    match failure {
                        Some(e) => done(Err(e)),
                        None => done(Ok(values.into_iter().flatten().collect())),
                    }
                }
            }) as Callback<T>
        })
        .collect()
}

/// Issue `op` once per item and complete `done` when all have completed
fn fan_out<I, T, F>(items: Vec<I>, op: F, done: Callback<Vec<T>>)
where
    T: Send + 'static,
    F: Fn(I, Callback<T>),
{
    let callbacks = gather(items.len(), done);
    for (item, callback) in items.into_iter().zip(callbacks) {
        op(item, callback);
    }
}

fn rebase(groups: Vec<Vec<NodeRef>>, time: Time) -> Vec<NodeRef> {
    let mut seen = HashSet::new();
    groups
        .into_iter()
        .flatten()
        .filter(|node| seen.insert(node.id))
        .map(|node| node.at(time))
        .collect()
}

fn pairs(parents: &[NodeRef], targets: &[NodeRef]) -> Vec<(NodeRef, NodeRef)> {
    parents
        .iter()
        .flat_map(|parent| targets.iter().map(move |target| (*parent, *target)))
        .collect()
}

fn run_nested(
    task: &Task,
    store: &Arc<dyn NodeStore>,
    ctx: TaskContext,
    next: Callback<TaskContext>,
) {
    let (world, time) = (ctx.world(), ctx.time());
    task.execute(
        Arc::clone(store),
        ctx,
        Box::new(move |result| match result {
            Ok(mut inner) => {
                // Nested tasks share variables but not world or time
                inner.set_world(world);
                inner.set_time(time);
                next(Ok(inner))
            }
            Err(e) => next(Err(e)),
        }),
    );
}

impl Action {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Action::SetTime(_) => "setTime",
            Action::SetWorld(_) => "setWorld",
            Action::FromVar(_) => "fromVar",
            Action::DefineVar(_) => "defineVar",
            Action::FromIndex { .. } => "fromIndex",
            Action::TraverseIndex { .. } => "traverseIndex",
            Action::Traverse(_) => "traverse",
            Action::EnsureUnique { .. } => "ensureUnique",
            Action::IfThen { .. } => "ifThen",
            Action::SubTask(_) => "subTask",
            Action::NewNode(_) => "newNode",
            Action::SetProperty { .. } => "setProperty",
            Action::Get(_) => "get",
            Action::IndexNode { .. } => "indexNode",
            Action::LocalIndex { .. } => "localIndex",
            Action::Add { .. } => "add",
            Action::Jump(_) => "jump",
        }
    }

    pub(crate) fn apply(
        &self,
        store: &Arc<dyn NodeStore>,
        mut ctx: TaskContext,
        next: Callback<TaskContext>,
    ) {
        match self {
            Action::SetTime(time) => {
                let time = or_fail!(time.resolve_time(&ctx), next);
                ctx.set_time(time);
                next(Ok(ctx))
            }
            Action::SetWorld(world) => {
                ctx.set_world(*world);
                next(Ok(ctx))
            }
            Action::FromVar(name) => {
                let slots = or_fail!(ctx.var(name).map(<[Slot]>::to_vec), next);
                ctx.set_result(slots);
                next(Ok(ctx))
            }
            Action::DefineVar(name) => {
                let slots = ctx.result().to_vec();
                ctx.define(name, slots);
                next(Ok(ctx))
            }
            Action::FromIndex { index, key } => {
                let key = or_fail!(key.resolve_key(&ctx), next);
                let (world, time) = (ctx.world(), ctx.time());
                store.query_index(
                    world,
                    LATEST,
                    index,
                    Some(&key),
                    resume(ctx, next, move |ctx, nodes| {
                        ctx.set_result_nodes(rebase(vec![nodes], time))
                    }),
                );
            }
            Action::TraverseIndex { relation, key } => {
                let key = or_fail!(key.resolve_key(&ctx), next);
                let time = ctx.time();
                fan_out(
                    ctx.result_nodes(),
                    |node, cb| store.traverse_index(node.at(LATEST), relation, Some(&key), cb),
                    resume(ctx, next, move |ctx, groups| {
                        ctx.set_result_nodes(rebase(groups, time))
                    }),
                );
            }
            Action::Traverse(relation) => {
                let time = ctx.time();
                fan_out(
                    ctx.result_nodes(),
                    |node, cb| store.traverse_relation(node.at(LATEST), relation, cb),
                    resume(ctx, next, move |ctx, groups| {
                        ctx.set_result_nodes(rebase(groups, time))
                    }),
                );
            }
            Action::EnsureUnique { index, key } => {
                let found = ctx.result().len();
                if found > 1 {
                    let key = or_fail!(key.resolve_key(&ctx), next);
                    next(Err(GraphError::IndexCorrupt {
                        index: index.clone(),
                        key,
                        found,
                    }))
                } else {
                    next(Ok(ctx))
                }
            }
            Action::IfThen { condition, then } => {
                if condition(&ctx) {
                    run_nested(then, store, ctx, next)
                } else {
                    next(Ok(ctx))
                }
            }
            Action::SubTask(task) => run_nested(task, store, ctx, next),
            Action::NewNode(node_type) => {
                let (world, time) = (ctx.world(), ctx.time());
                store.create_node(
                    world,
                    time,
                    node_type.as_deref(),
                    resume(ctx, next, |ctx, node| ctx.set_result_nodes(vec![node])),
                );
            }
            Action::SetProperty {
                name,
                value_type,
                value,
            } => {
                let value = or_fail!(value.resolve(&ctx), next);
                fan_out(
                    ctx.result_nodes(),
                    |node, cb| store.set_property(node, name, *value_type, value.clone(), cb),
                    resume(ctx, next, |_, _: Vec<()>| {}),
                );
            }
            Action::Get(name) => {
                fan_out(
                    ctx.result_nodes(),
                    |node, cb| store.get_property(node, name, cb),
                    resume(ctx, next, |ctx, values: Vec<Option<Value>>| {
                        ctx.set_result(values.into_iter().flatten().map(Slot::Value).collect())
                    }),
                );
            }
            Action::IndexNode { index, attribute } => {
                fan_out(
                    ctx.result_nodes(),
                    |node, cb| {
                        let store2 = Arc::clone(store);
                        let index = index.clone();
                        let attr = attribute.clone();
                        store.get_property(
                            node,
                            attribute,
                            Box::new(move |result| match result {
                                Ok(Some(key)) => store2.index_node(&index, &key.index_key(), node, cb),
                                Ok(None) => cb(Err(GraphError::MissingValue {
                                    node: node.id,
                                    attribute: attr,
                                    time: node.time,
                                })),
                                Err(e) => cb(Err(e)),
                            }),
                        )
                    },
                    resume(ctx, next, |_, _: Vec<()>| {}),
                );
            }
            Action::LocalIndex {
                relation,
                attribute,
                var,
            } => {
                let targets = or_fail!(ctx.var_nodes(var), next);
                fan_out(
                    pairs(&ctx.result_nodes(), &targets),
                    |(parent, target), cb| {
                        let store2 = Arc::clone(store);
                        let relation = relation.clone();
                        let attr = attribute.clone();
                        store.get_property(
                            target,
                            attribute,
                            Box::new(move |result| match result {
                                Ok(Some(key)) => store2.local_index(
                                    parent,
                                    &relation,
                                    &key.index_key(),
                                    target,
                                    cb,
                                ),
                                Ok(None) => cb(Err(GraphError::MissingValue {
                                    node: target.id,
                                    attribute: attr,
                                    time: target.time,
                                })),
                                Err(e) => cb(Err(e)),
                            }),
                        )
                    },
                    resume(ctx, next, |_, _: Vec<()>| {}),
                );
            }
            Action::Add { relation, var } => {
                let targets = or_fail!(ctx.var_nodes(var), next);
                fan_out(
                    pairs(&ctx.result_nodes(), &targets),
                    |(parent, target), cb| store.add_to_relation(parent, relation, target, cb),
                    resume(ctx, next, |_, _: Vec<()>| {}),
                );
            }
            Action::Jump(time) => {
                let time = or_fail!(time.resolve_time(&ctx), next);
                let nodes = ctx.result_nodes();
                ctx.set_result_nodes(rebase(vec![nodes], time));
                next(Ok(ctx))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_preserves_order() {
        let out = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&out);
        let callbacks = gather::<u32>(
            3,
            Box::new(move |r| {
                *sink.lock().unwrap() = Some(r);
            }),
        );
        let mut callbacks: Vec<_> = callbacks.into_iter().map(Some).collect();
        (callbacks[2].take().unwrap())(Ok(30));
        (callbacks[0].take().unwrap())(Ok(10));
        assert!(out.lock().unwrap().is_none());
        (callbacks[1].take().unwrap())(Ok(20));
        assert_eq!(out.lock().unwrap().take(), Some(Ok(vec![10, 20, 30])));
    }

    #[test]
    fn test_gather_empty_completes_immediately() {
        let out = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&out);
        let callbacks = gather::<u32>(0, Box::new(move |r| *sink.lock().unwrap() = Some(r)));
        assert!(callbacks.is_empty());
        assert_eq!(out.lock().unwrap().take(), Some(Ok(vec![])));
    }

    #[test]
    fn test_gather_reports_failure() {
        let out = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&out);
        let mut callbacks = gather::<u32>(2, Box::new(move |r| *sink.lock().unwrap() = Some(r)));
        (callbacks.remove(0))(Err(GraphError::UnknownNode(4)));
        (callbacks.remove(0))(Ok(1));
        assert_eq!(
            out.lock().unwrap().take(),
            Some(Err(GraphError::UnknownNode(4)))
        );
    }

    #[test]
    fn test_rebase_dedups_and_moves_time() {
        let a = NodeRef::new(0, Time::MAX, 1);
        let b = NodeRef::new(0, Time::MAX, 2);
        let out = rebase(vec![vec![a, b], vec![a]], 50);
        assert_eq!(out, vec![a.at(50), b.at(50)]);
    }

    #[test]
    fn test_param_time_must_be_long() {
        let ctx = TaskContext::new(0, 0).with_var("timeStamp", "12");
        let err = Param::var("timeStamp").resolve_time(&ctx).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
    }
}
