// src/group/task_group.rs

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::stream::BoxStream;
use tracing::{debug, info};

use crate::context::InvocationContext;
use crate::dag::entry::{EntryKey, SharedEntry};
use crate::dag::graph::{path_exists, TaskDag};
use crate::dag::TaskEntry;
use crate::engine::{driver, TerminationStrategy};
use crate::errors::{Result, TaskDagError};
use crate::group::proxy::{self, ProxyTaskGroupWrapper};
use crate::item::TaskItem;
use crate::lock;

/// A DAG of work items with a distinguished root entry, composable with
/// other groups.
///
/// `TaskGroup` is a cheap cloneable handle; clones refer to the same
/// group. Equality is handle identity.
///
/// Composition:
/// - [`TaskGroup::add_dependency_task_group`] makes this group's root
///   depend on another group's root, merging the other group's entries
///   into this group's DAG (and into every group already depending on this
///   one).
/// - [`TaskGroup::add_post_run_dependent_task_group`] schedules another
///   group to run after this group's root *and* before anything that
///   already depended on this group, by interposing a proxy root (see
///   [`crate::group::proxy`]).
///
/// Invoking any group with [`TaskGroup::invoke_async`] transitively
/// invokes everything reachable through dependencies and post-run
/// dependents.
pub struct TaskGroup<R> {
    pub(crate) inner: Arc<Mutex<GroupInner<R>>>,
}

pub(crate) struct GroupInner<R> {
    pub(crate) dag: TaskDag<R>,
    /// Groups whose root currently depends on this group's root (possibly
    /// via a proxy). Weak back-references: composition must not create
    /// ownership cycles.
    pub(crate) parents: Vec<Weak<Mutex<GroupInner<R>>>>,
    /// Post-run dependents in the order they were attached.
    pub(crate) post_run_dependents: Vec<TaskGroup<R>>,
    pub(crate) proxy: ProxyTaskGroupWrapper<R>,
    pub(crate) strategy: TerminationStrategy,
    pub(crate) invocation_active: bool,
}

impl<R> Clone for TaskGroup<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> PartialEq for TaskGroup<R> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<R> Eq for TaskGroup<R> {}

impl<R> std::fmt::Debug for TaskGroup<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("TaskGroup")
            .field("root", inner.dag.root_key())
            .field("entries", &inner.dag.len())
            .finish()
    }
}

impl<R> TaskGroup<R> {
    /// Create a group whose DAG initially holds only the root entry.
    pub fn new(
        root_key: impl Into<EntryKey>,
        root_item: impl TaskItem<R> + 'static,
        strategy: TerminationStrategy,
    ) -> Self {
        Self::with_shared_item(root_key.into(), Arc::new(root_item), strategy)
    }

    pub(crate) fn with_shared_item(
        root_key: EntryKey,
        root_item: Arc<dyn TaskItem<R>>,
        strategy: TerminationStrategy,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GroupInner {
                dag: TaskDag::with_shared_root(root_key, root_item),
                parents: Vec::new(),
                post_run_dependents: Vec::new(),
                proxy: ProxyTaskGroupWrapper::new(),
                strategy,
                invocation_active: false,
            })),
        }
    }

    pub fn root_key(&self) -> EntryKey {
        lock(&self.inner).dag.root_key().clone()
    }

    pub fn termination_strategy(&self) -> TerminationStrategy {
        lock(&self.inner).strategy
    }

    /// Keys of every entry in this group's DAG, in insertion order.
    pub fn entry_keys(&self) -> Vec<EntryKey> {
        lock(&self.inner).dag.keys()
    }

    pub fn contains_entry(&self, key: &str) -> bool {
        lock(&self.inner).dag.contains_key(key)
    }

    /// Add an entry to this group's own DAG.
    pub fn add_entry(&self, key: impl Into<EntryKey>, item: impl TaskItem<R> + 'static) -> Result<()> {
        self.ensure_mutable()?;
        lock(&self.inner).dag.add_entry(key, item)
    }

    /// Record that entry `to` depends on entry `from` within this group's
    /// DAG.
    pub fn add_edge(&self, from: &str, to: &str) -> Result<()> {
        self.ensure_mutable()?;
        lock(&self.inner).dag.add_edge(from, to)
    }

    /// Groups whose root currently depends on this group's root.
    pub fn parent_groups(&self) -> Vec<TaskGroup<R>> {
        lock(&self.inner)
            .parents
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| TaskGroup { inner })
            .collect()
    }

    /// Post-run dependents in attachment order.
    pub fn post_run_dependents(&self) -> Vec<TaskGroup<R>> {
        lock(&self.inner).post_run_dependents.clone()
    }

    /// The proxy task group, if a post-run dependent has activated it.
    pub fn proxy_task_group(&self) -> Option<TaskGroup<R>> {
        lock(&self.inner).proxy.proxy_group()
    }

    /// Make this group's root depend on `dependency`'s root.
    ///
    /// If `dependency` has an active proxy, the edge targets the proxy
    /// root instead, so this group also waits for the dependency's
    /// post-run dependents. Calling this twice with the same argument is a
    /// no-op.
    pub fn add_dependency_task_group(&self, dependency: &TaskGroup<R>) -> Result<()> {
        let effective = dependency.effective_group();
        self.add_dependency_graph(&effective)
    }

    /// Fresh shared state bag for one invocation.
    pub fn new_invocation_context(&self) -> InvocationContext {
        InvocationContext::new()
    }
}

impl<R: Send + 'static> TaskGroup<R> {
    /// Schedule `dependent` to run after this group's root completes, and
    /// before every group that already depended on this one observes the
    /// completion.
    ///
    /// The first call interposes a proxy root above this group's real
    /// root and re-wires existing parents onto it; later calls only hang
    /// further dependents off the existing proxy.
    pub fn add_post_run_dependent_task_group(&self, dependent: &TaskGroup<R>) -> Result<()> {
        self.ensure_mutable()?;
        dependent.ensure_mutable()?;
        let my_root = self.root_key();
        let dependent_root = dependent.root_key();

        // Pre-flight: the dependent will come to depend on this group's
        // root; reject before any proxy state is touched if that edge
        // would close a cycle.
        if self == dependent {
            return Err(TaskDagError::CycleDetected {
                from: my_root,
                to: dependent_root,
            });
        }
        {
            let combined = combine_tables(&[self.snapshot_table(), dependent.snapshot_table()])?;
            if path_exists(&combined, &dependent_root, &my_root) {
                return Err(TaskDagError::CycleDetected {
                    from: my_root,
                    to: dependent_root,
                });
            }
        }

        let proxy_group = proxy::ensure_activated(self)?;

        // The dependent runs after this group's real root. This edge goes
        // to the real root on purpose: routing it through our own proxy
        // would make the proxy depend on itself.
        dependent.add_dependency_graph(self)?;

        // The proxy completes only after the dependent (or, when the
        // dependent has its own proxy, after that whole proxied subtree).
        let dependent_effective = dependent.effective_group();
        proxy_group.add_dependency_graph(&dependent_effective)?;

        {
            let mut inner = lock(&self.inner);
            if !inner.post_run_dependents.iter().any(|g| g == dependent) {
                inner.post_run_dependents.push(dependent.clone());
            }
        }
        info!(
            group = %my_root,
            dependent = %dependent_root,
            "added post-run dependent task group"
        );
        Ok(())
    }

    /// Invoke every entry reachable from this group, lazily streaming
    /// results in completion order.
    ///
    /// If a proxy is active the enumeration starts from the proxy's DAG,
    /// so post-run dependents are included. The returned stream dispatches
    /// work as it is polled; dropping it stops further dispatch while
    /// already-running items finish detached (their results are
    /// discarded). A Tokio runtime must be ambient when polling.
    pub fn invoke_async(&self, context: &InvocationContext) -> BoxStream<'static, Result<R>> {
        driver::invoke(self.clone(), context.clone())
    }
}

impl<R> TaskGroup<R> {
    // ---- enumeration over this group's own DAG; `invoke_async` drives
    // ---- the same machinery ----

    pub fn prepare_for_enumeration(&self) {
        lock(&self.inner).dag.prepare_for_enumeration();
    }

    pub fn get_next(&self) -> Option<TaskEntry<R>> {
        lock(&self.inner).dag.get_next()
    }

    pub fn report_completion(&self, entry: &TaskEntry<R>) -> Result<()> {
        lock(&self.inner).dag.report_completion(entry)
    }

    pub fn report_failure(&self, entry: &TaskEntry<R>, error: &anyhow::Error) -> Result<()> {
        lock(&self.inner).dag.report_failure(entry, error)
    }

    pub fn has_work_in_progress(&self) -> bool {
        lock(&self.inner).dag.has_work_in_progress()
    }

    pub fn is_enumeration_complete(&self) -> bool {
        lock(&self.inner).dag.is_enumeration_complete()
    }

    // ---- composition internals ----

    /// The group an invocation should enumerate: the proxy when active,
    /// otherwise this group itself.
    pub(crate) fn effective_group(&self) -> TaskGroup<R> {
        self.proxy_task_group().unwrap_or_else(|| self.clone())
    }

    pub(crate) fn root_item(&self) -> Arc<dyn TaskItem<R>> {
        let inner = lock(&self.inner);
        let root = inner.dag.root_entry();
        drop(inner);
        let item = Arc::clone(&lock(&root).item);
        item
    }

    pub(crate) fn snapshot_table(&self) -> Vec<(EntryKey, SharedEntry<R>)> {
        lock(&self.inner).dag.snapshot_table()
    }

    /// Direct graph-level link: this group's root depends on
    /// `dependency`'s root, with no proxy routing. All structural checks
    /// run before any state is mutated.
    pub(crate) fn add_dependency_graph(&self, dependency: &TaskGroup<R>) -> Result<()> {
        self.ensure_mutable()?;
        dependency.ensure_mutable()?;
        let my_root = self.root_key();
        let dep_root = dependency.root_key();

        if self == dependency {
            return Err(TaskDagError::CycleDetected {
                from: dep_root,
                to: my_root,
            });
        }

        // Idempotent: this exact group is already linked. A key match
        // alone is not enough; a distinct group under a colliding root
        // key must fall through to the collision check below.
        if self.root_depends_on(&dep_root) {
            let mine = lock(&self.inner).dag.get(&dep_root).cloned();
            let theirs = {
                let inner = lock(&dependency.inner);
                inner.dag.root_entry()
            };
            if let Some(mine) = mine {
                if Arc::ptr_eq(&mine, &theirs) {
                    debug!(group = %my_root, dependency = %dep_root, "dependency already linked");
                    return Ok(());
                }
            }
        }

        let dep_table = dependency.snapshot_table();
        let my_table = self.snapshot_table();

        // Key collisions between distinct entries and the would-be cycle
        // are both rejected up front, so the mutation below cannot fail
        // half-way.
        let combined = combine_tables(&[my_table, dep_table.clone()])?;
        if path_exists(&combined, &my_root, &dep_root) {
            return Err(TaskDagError::CycleDetected {
                from: dep_root,
                to: my_root,
            });
        }
        let ancestors = self.collect_ancestors();
        for ancestor in &ancestors {
            check_collisions(&ancestor.snapshot_table(), &dep_table)?;
        }

        {
            let inner = lock(&self.inner);
            let root = inner.dag.root_entry();
            drop(inner);
            lock(&root).dependency_keys.insert(dep_root.clone());
        }
        lock(&self.inner)
            .dag
            .merge_table(&dep_table)
            .expect("collisions checked before merging");
        for ancestor in &ancestors {
            lock(&ancestor.inner)
                .dag
                .merge_table(&dep_table)
                .expect("collisions checked before merging");
        }
        dependency.push_parent(self);

        debug!(group = %my_root, dependency = %dep_root, "linked dependency task group");
        Ok(())
    }

    pub(crate) fn push_parent(&self, parent: &TaskGroup<R>) {
        let mut inner = lock(&self.inner);
        let ptr = Arc::as_ptr(&parent.inner);
        if !inner.parents.iter().any(|weak| weak.as_ptr() == ptr) {
            inner.parents.push(Arc::downgrade(&parent.inner));
        }
    }

    /// Drain this group's parent list, upgrading the survivors.
    pub(crate) fn take_parents(&self) -> Vec<TaskGroup<R>> {
        let weaks = std::mem::take(&mut lock(&self.inner).parents);
        weaks
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| TaskGroup { inner })
            .collect()
    }

    /// Remove the dependency of this group's root on the given key.
    pub(crate) fn remove_root_dependency_on(&self, key: &str) {
        let inner = lock(&self.inner);
        let root = inner.dag.root_entry();
        drop(inner);
        lock(&root).dependency_keys.remove(key);
    }

    pub(crate) fn set_proxy(&self, proxy_group: TaskGroup<R>) {
        lock(&self.inner).proxy.set(proxy_group);
    }

    pub(crate) fn set_invocation_active(&self, active: bool) {
        lock(&self.inner).invocation_active = active;
    }

    fn ensure_mutable(&self) -> Result<()> {
        if lock(&self.inner).invocation_active {
            return Err(TaskDagError::InvalidState(format!(
                "task group '{}' has an active invocation; composition is frozen",
                self.root_key()
            )));
        }
        Ok(())
    }

    fn root_depends_on(&self, key: &str) -> bool {
        let inner = lock(&self.inner);
        let root = inner.dag.root_entry();
        drop(inner);
        let contains = lock(&root).dependency_keys.contains(key);
        contains
    }

    /// All transitive parents (deduplicated, this group excluded).
    fn collect_ancestors(&self) -> Vec<TaskGroup<R>> {
        let mut visited = vec![Arc::as_ptr(&self.inner)];
        let mut result = Vec::new();
        let mut frontier = self.parent_groups();
        while let Some(group) = frontier.pop() {
            let ptr = Arc::as_ptr(&group.inner);
            if visited.contains(&ptr) {
                continue;
            }
            visited.push(ptr);
            frontier.extend(group.parent_groups());
            result.push(group);
        }
        result
    }
}

/// Union of several table snapshots, rejecting key collisions between
/// distinct entries.
fn combine_tables<R>(
    tables: &[Vec<(EntryKey, SharedEntry<R>)>],
) -> Result<HashMap<EntryKey, SharedEntry<R>>> {
    let mut combined: HashMap<EntryKey, SharedEntry<R>> = HashMap::new();
    for table in tables {
        for (key, node) in table {
            match combined.entry(key.clone()) {
                Entry::Occupied(existing) => {
                    if !Arc::ptr_eq(existing.get(), node) {
                        return Err(TaskDagError::DuplicateKey(key.clone()));
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(node));
                }
            }
        }
    }
    Ok(combined)
}

fn check_collisions<R>(
    table: &[(EntryKey, SharedEntry<R>)],
    incoming: &[(EntryKey, SharedEntry<R>)],
) -> Result<()> {
    let index: HashMap<&EntryKey, &SharedEntry<R>> =
        table.iter().map(|(key, node)| (key, node)).collect();
    for (key, node) in incoming {
        if let Some(existing) = index.get(key) {
            if !Arc::ptr_eq(existing, node) {
                return Err(TaskDagError::DuplicateKey(key.clone()));
            }
        }
    }
    Ok(())
}
