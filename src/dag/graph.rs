// src/dag/graph.rs

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

use crate::dag::entry::{shared_entry, EntryKey, EntryState, SharedEntry, TaskEntry};
use crate::errors::{Result, TaskDagError};
use crate::item::TaskItem;
use crate::lock;

/// Directed acyclic collection of entries keyed by [`EntryKey`].
///
/// A `TaskDag` owns the ready-queue walker used for topological
/// enumeration. Entries are shared (`Arc`) so that DAGs composed through
/// task groups hold the very same nodes; each DAG's table is the closure
/// of entries reachable from its root.
///
/// Enumeration protocol: [`TaskDag::prepare_for_enumeration`], then
/// alternate [`TaskDag::get_next`] and [`TaskDag::report_completion`] /
/// [`TaskDag::report_failure`] until the queue drains and nothing is in
/// progress. Only one enumeration may be active across a composed set of
/// DAGs at a time, since per-enumeration scratch state lives on the shared
/// entries.
pub struct TaskDag<R> {
    nodes: HashMap<EntryKey, SharedEntry<R>>,
    /// Insertion order of keys; gives enumeration a stable leaf order.
    order: Vec<EntryKey>,
    root_key: EntryKey,
    ready_queue: VecDeque<EntryKey>,
    in_progress: usize,
}

impl<R> TaskDag<R> {
    /// A DAG starts out holding only its root entry.
    pub fn new(root_key: impl Into<EntryKey>, root_item: impl TaskItem<R> + 'static) -> Self {
        Self::with_shared_root(root_key.into(), Arc::new(root_item))
    }

    pub(crate) fn with_shared_root(root_key: EntryKey, root_item: Arc<dyn TaskItem<R>>) -> Self {
        let root = shared_entry(root_key.clone(), root_item);
        let mut nodes = HashMap::new();
        nodes.insert(root_key.clone(), root);
        Self {
            nodes,
            order: vec![root_key.clone()],
            root_key,
            ready_queue: VecDeque::new(),
            in_progress: 0,
        }
    }

    pub fn root_key(&self) -> &EntryKey {
        &self.root_key
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<EntryKey> {
        self.order.clone()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&SharedEntry<R>> {
        self.nodes.get(key)
    }

    pub(crate) fn root_entry(&self) -> SharedEntry<R> {
        Arc::clone(
            self.nodes
                .get(&self.root_key)
                .expect("root entry is inserted at construction"),
        )
    }

    /// Insert a new entry. Its dependencies are added separately with
    /// [`TaskDag::add_edge`].
    pub fn add_entry(&mut self, key: impl Into<EntryKey>, item: impl TaskItem<R> + 'static) -> Result<()> {
        let key = key.into();
        if self.nodes.contains_key(&key) {
            return Err(TaskDagError::DuplicateKey(key));
        }
        debug!(key = %key, "adding entry to DAG");
        self.nodes
            .insert(key.clone(), shared_entry(key.clone(), Arc::new(item)));
        self.order.push(key);
        Ok(())
    }

    /// Record that `to` depends on `from`.
    ///
    /// Rejected with [`TaskDagError::CycleDetected`] if a path from `to`
    /// back to `from` already exists; the graph is left untouched in that
    /// case. Adding an edge that is already present is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.nodes.contains_key(from) {
            return Err(TaskDagError::UnknownKey(from.to_string()));
        }
        let target = self
            .nodes
            .get(to)
            .ok_or_else(|| TaskDagError::UnknownKey(to.to_string()))?;

        if lock(target).dependency_keys.contains(from) {
            return Ok(());
        }
        if from == to || path_exists(&self.nodes, to, from) {
            return Err(TaskDagError::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        debug!(from = %from, to = %to, "adding dependency edge");
        lock(target).dependency_keys.insert(from.to_string());
        Ok(())
    }

    /// Snapshot of the node table, in insertion order.
    pub(crate) fn snapshot_table(&self) -> Vec<(EntryKey, SharedEntry<R>)> {
        self.order
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    Arc::clone(self.nodes.get(key).expect("order tracks the node table")),
                )
            })
            .collect()
    }

    /// Absorb entries from another DAG's table.
    ///
    /// Entries already present by identity are skipped. A key collision
    /// between two *distinct* entries is rejected before anything is
    /// merged.
    pub(crate) fn merge_table(&mut self, table: &[(EntryKey, SharedEntry<R>)]) -> Result<()> {
        for (key, node) in table {
            if let Some(existing) = self.nodes.get(key) {
                if !Arc::ptr_eq(existing, node) {
                    return Err(TaskDagError::DuplicateKey(key.clone()));
                }
            }
        }
        for (key, node) in table {
            if !self.nodes.contains_key(key) {
                self.nodes.insert(key.clone(), Arc::clone(node));
                self.order.push(key.clone());
            }
        }
        Ok(())
    }

    /// Reset per-enumeration state and fill the ready queue with leaves.
    ///
    /// Dependent sets and pending counts are rebuilt from the dependency
    /// sets of entries in *this* DAG's table, so edges pointing at entries
    /// outside the table (e.g. a dependent group's root) do not take part
    /// in this enumeration.
    pub fn prepare_for_enumeration(&mut self) {
        for key in &self.order {
            if let Some(node) = self.nodes.get(key) {
                lock(node).initialize();
            }
        }

        for key in self.order.clone() {
            let deps: Vec<EntryKey> = {
                let node = self.nodes.get(&key).expect("order tracks the node table");
                lock(node).dependency_keys.iter().cloned().collect()
            };
            for dep in deps {
                match self.nodes.get(&dep) {
                    Some(dep_node) => {
                        lock(dep_node).dependent_keys.insert(key.clone());
                    }
                    None => {
                        // Tables are closed under dependency edges by
                        // construction; tolerate a gap rather than wedge
                        // the enumeration.
                        warn!(key = %key, dep = %dep, "dependency missing from node table");
                        let node = self.nodes.get(&key).expect("order tracks the node table");
                        let mut guard = lock(node);
                        guard.pending_dependency_count =
                            guard.pending_dependency_count.saturating_sub(1);
                    }
                }
            }
        }

        self.ready_queue.clear();
        self.in_progress = 0;
        for key in &self.order {
            let node = self.nodes.get(key).expect("order tracks the node table");
            let mut guard = lock(node);
            if guard.pending_dependency_count == 0 {
                guard.state = EntryState::Ready;
                self.ready_queue.push_back(key.clone());
            }
        }
        debug!(
            root = %self.root_key,
            entries = self.order.len(),
            leaves = self.ready_queue.len(),
            "prepared DAG for enumeration"
        );
    }

    /// Dequeue one ready entry and mark it in progress.
    ///
    /// Returns `None` when the ready queue is empty; use
    /// [`TaskDag::has_work_in_progress`] to distinguish "drained" from
    /// "waiting on in-flight completions".
    pub fn get_next(&mut self) -> Option<TaskEntry<R>> {
        while let Some(key) = self.ready_queue.pop_front() {
            let node = self.nodes.get(&key)?;
            let mut guard = lock(node);
            if guard.state != EntryState::Ready {
                // Faulted while queued; skip.
                continue;
            }
            guard.state = EntryState::InProgress;
            drop(guard);
            self.in_progress += 1;
            return Some(TaskEntry {
                node: Arc::clone(node),
            });
        }
        None
    }

    pub fn has_work_in_progress(&self) -> bool {
        self.in_progress > 0
    }

    /// The enumeration is complete when nothing is ready and nothing is in
    /// flight.
    pub fn is_enumeration_complete(&self) -> bool {
        self.ready_queue.is_empty() && self.in_progress == 0
    }

    /// Mark an in-progress entry as succeeded and unblock its dependents.
    pub fn report_completion(&mut self, entry: &TaskEntry<R>) -> Result<()> {
        let key = entry.key();
        let node = self
            .nodes
            .get(&key)
            .ok_or_else(|| TaskDagError::UnknownKey(key.clone()))?;
        if !Arc::ptr_eq(node, &entry.node) {
            return Err(TaskDagError::UnknownKey(key));
        }

        let dependents: Vec<EntryKey> = {
            let mut guard = lock(node);
            if guard.state != EntryState::InProgress {
                return Err(TaskDagError::InvalidState(format!(
                    "cannot report completion for entry '{}' in state {:?}",
                    key, guard.state
                )));
            }
            guard.state = EntryState::Succeeded;
            guard.dependent_keys.iter().cloned().collect()
        };
        self.in_progress -= 1;
        debug!(key = %key, "entry completed");

        for dependent in dependents {
            match self.nodes.get(&dependent) {
                Some(dep_node) => {
                    let mut guard = lock(dep_node);
                    if guard.state != EntryState::NotStarted {
                        continue;
                    }
                    guard.pending_dependency_count =
                        guard.pending_dependency_count.saturating_sub(1);
                    if guard.pending_dependency_count == 0 {
                        guard.state = EntryState::Ready;
                        drop(guard);
                        debug!(key = %dependent, "dependencies satisfied; entry ready");
                        self.ready_queue.push_back(dependent);
                    }
                }
                None => {
                    warn!(key = %dependent, "dependent missing from node table; skipping");
                }
            }
        }
        Ok(())
    }

    /// Mark an in-progress entry as faulted and fault its transitive
    /// dependents so they are never dispatched in this enumeration.
    pub fn report_failure(&mut self, entry: &TaskEntry<R>, error: &anyhow::Error) -> Result<()> {
        let key = entry.key();
        let node = self
            .nodes
            .get(&key)
            .ok_or_else(|| TaskDagError::UnknownKey(key.clone()))?;
        if !Arc::ptr_eq(node, &entry.node) {
            return Err(TaskDagError::UnknownKey(key));
        }

        let dependents: Vec<EntryKey> = {
            let mut guard = lock(node);
            if guard.state != EntryState::InProgress {
                return Err(TaskDagError::InvalidState(format!(
                    "cannot report failure for entry '{}' in state {:?}",
                    key, guard.state
                )));
            }
            guard.state = EntryState::Faulted;
            guard.dependent_keys.iter().cloned().collect()
        };
        self.in_progress -= 1;
        warn!(key = %key, error = %error, "entry faulted; blocking dependents");

        let mut stack = dependents;
        while let Some(dependent) = stack.pop() {
            if let Some(dep_node) = self.nodes.get(&dependent) {
                let mut guard = lock(dep_node);
                match guard.state {
                    EntryState::NotStarted | EntryState::Ready => {
                        guard.state = EntryState::Faulted;
                        stack.extend(guard.dependent_keys.iter().cloned());
                        debug!(key = %dependent, "blocked by upstream failure");
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Whether a path `from -> ... -> to` exists along dependency edges
/// (`u -> v` meaning `v` depends on `u`) within the given node table.
pub(crate) fn path_exists<R>(
    nodes: &HashMap<EntryKey, SharedEntry<R>>,
    from: &str,
    to: &str,
) -> bool {
    let mut ids: HashMap<EntryKey, u32> = HashMap::with_capacity(nodes.len());
    for (idx, key) in nodes.keys().enumerate() {
        ids.insert(key.clone(), idx as u32);
    }
    let (start, goal) = match (ids.get(from), ids.get(to)) {
        (Some(start), Some(goal)) => (*start, *goal),
        _ => return false,
    };

    let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();
    for id in ids.values() {
        graph.add_node(*id);
    }
    for (key, node) in nodes.iter() {
        let target = ids[key];
        for dep in lock(node).dependency_keys.iter() {
            if let Some(source) = ids.get(dep) {
                graph.add_edge(*source, target, ());
            }
        }
    }

    has_path_connecting(&graph, start, goal, None)
}
