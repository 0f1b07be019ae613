// src/group/proxy.rs

//! Proxy interposition for post-run dependents.
//!
//! When a group `G` gains a post-run dependent while other groups already
//! depend on `G`'s root `F`, those parents must not start once `F` alone
//! completes: `G`'s work now includes the dependent. The fix is a proxy
//! root `proxy-F` interposed above `F`:
//!
//! - every existing parent's edge onto `F` is replaced by an edge onto
//!   `proxy-F`,
//! - `proxy-F` depends on `F` and on each post-run dependent's root,
//!
//! so parents come to depend on the post-run work transitively. Once
//! created, the proxy is never torn down; later dependents just add edges
//! onto it, and proxies of nested groups chain through each other.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::errors::Result;
use crate::group::task_group::TaskGroup;
use crate::item::{TaskItem, TaskItemOutput};
use crate::InvocationContext;

/// Lazily-initialized holder for a group's proxy task group.
pub(crate) struct ProxyTaskGroupWrapper<R> {
    proxy_group: Option<TaskGroup<R>>,
}

impl<R> ProxyTaskGroupWrapper<R> {
    pub(crate) fn new() -> Self {
        Self { proxy_group: None }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.proxy_group.is_some()
    }

    pub(crate) fn proxy_group(&self) -> Option<TaskGroup<R>> {
        self.proxy_group.clone()
    }

    pub(crate) fn set(&mut self, proxy_group: TaskGroup<R>) {
        debug_assert!(!self.is_active(), "proxy task group activated twice");
        self.proxy_group = Some(proxy_group);
    }
}

/// Return the group's proxy, interposing it on first use.
///
/// Activation re-homes every existing parent of `actual` onto the proxy:
/// the old edge onto the real root is deleted and replaced by an edge onto
/// the proxy root, and the parents move from `actual`'s parent list to the
/// proxy's. Finally the proxy is made to depend on `actual` itself, so the
/// real root is always enumerated before the proxy.
pub(crate) fn ensure_activated<R: Send + 'static>(actual: &TaskGroup<R>) -> Result<TaskGroup<R>> {
    if let Some(existing) = actual.proxy_task_group() {
        return Ok(existing);
    }

    let root_key = actual.root_key();
    let proxy_key = format!("proxy-{root_key}");
    let proxy_item = ProxyTaskItem {
        actual: actual.root_item(),
    };
    let proxy_group = TaskGroup::with_shared_item(
        proxy_key.clone(),
        Arc::new(proxy_item),
        actual.termination_strategy(),
    );
    debug!(group = %root_key, proxy = %proxy_key, "activating proxy task group");

    for parent in actual.take_parents() {
        parent.remove_root_dependency_on(&root_key);
        parent.add_dependency_graph(&proxy_group)?;
        debug!(
            parent = %parent.root_key(),
            proxy = %proxy_key,
            "re-homed parent onto proxy root"
        );
    }

    proxy_group.add_dependency_graph(actual)?;
    actual.set_proxy(proxy_group.clone());
    Ok(proxy_group)
}

/// No-op work item backing a proxy root.
///
/// Emits nothing into the invocation stream; `result` reflects the real
/// root's item so inspection through the proxy stays meaningful.
pub(crate) struct ProxyTaskItem<R> {
    actual: Arc<dyn TaskItem<R>>,
}

impl<R: Send + 'static> TaskItem<R> for ProxyTaskItem<R> {
    fn result(&self) -> Option<R> {
        self.actual.result()
    }

    fn invoke_async(&self, _context: InvocationContext) -> TaskItemOutput<R> {
        stream::empty().boxed()
    }
}
