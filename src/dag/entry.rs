// src/dag/entry.rs

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::item::TaskItem;
use crate::lock;

/// Key identifying an entry within a DAG (and across composed DAGs).
pub type EntryKey = String;

/// Lifecycle of an entry within one enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Waiting on at least one dependency.
    NotStarted,
    /// All dependencies resolved; sitting in the ready queue.
    Ready,
    /// Dequeued and handed to the caller / dispatched to the executor.
    InProgress,
    /// Reported complete.
    Succeeded,
    /// Reported failed, or blocked by an upstream failure.
    Faulted,
}

/// Node data for a single work item.
///
/// `dependency_keys` is the static edge set and survives across
/// enumerations. `dependent_keys` and `pending_dependency_count` are
/// per-enumeration scratch state, rebuilt by the enumerating DAG so that
/// an entry shared between composed DAGs is only wired to dependents the
/// current enumeration can actually reach.
pub(crate) struct EntryNode<R> {
    pub(crate) key: EntryKey,
    pub(crate) item: Arc<dyn TaskItem<R>>,
    pub(crate) dependency_keys: BTreeSet<EntryKey>,
    pub(crate) dependent_keys: BTreeSet<EntryKey>,
    pub(crate) pending_dependency_count: usize,
    pub(crate) state: EntryState,
}

impl<R> EntryNode<R> {
    pub(crate) fn new(key: EntryKey, item: Arc<dyn TaskItem<R>>) -> Self {
        Self {
            key,
            item,
            dependency_keys: BTreeSet::new(),
            dependent_keys: BTreeSet::new(),
            pending_dependency_count: 0,
            state: EntryState::NotStarted,
        }
    }

    /// Reset per-enumeration state.
    pub(crate) fn initialize(&mut self) {
        self.pending_dependency_count = self.dependency_keys.len();
        self.dependent_keys.clear();
        self.state = EntryState::NotStarted;
    }
}

pub(crate) type SharedEntry<R> = Arc<Mutex<EntryNode<R>>>;

pub(crate) fn shared_entry<R>(key: EntryKey, item: Arc<dyn TaskItem<R>>) -> SharedEntry<R> {
    Arc::new(Mutex::new(EntryNode::new(key, item)))
}

/// Public handle onto an entry, as returned by `get_next`.
pub struct TaskEntry<R> {
    pub(crate) node: SharedEntry<R>,
}

impl<R> Clone for TaskEntry<R> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<R> TaskEntry<R> {
    pub fn key(&self) -> EntryKey {
        lock(&self.node).key.clone()
    }

    pub fn state(&self) -> EntryState {
        lock(&self.node).state
    }

    pub fn item(&self) -> Arc<dyn TaskItem<R>> {
        Arc::clone(&lock(&self.node).item)
    }

    /// Static dependency keys of this entry.
    pub fn dependency_keys(&self) -> Vec<EntryKey> {
        lock(&self.node).dependency_keys.iter().cloned().collect()
    }

    pub fn pending_dependency_count(&self) -> usize {
        lock(&self.node).pending_dependency_count
    }
}

impl<R> std::fmt::Debug for TaskEntry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let node = lock(&self.node);
        f.debug_struct("TaskEntry")
            .field("key", &node.key)
            .field("state", &node.state)
            .field("pending", &node.pending_dependency_count)
            .finish()
    }
}
