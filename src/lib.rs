// src/lib.rs

//! Task-group DAG scheduler with dynamic composition.
//!
//! `taskdag` coordinates interdependent work items across multiple
//! dynamically-composed DAGs that share nodes:
//!
//! - a [`TaskGroup`] is a DAG of [`TaskItem`]s with a distinguished root;
//! - groups are linked with [`TaskGroup::add_dependency_task_group`];
//! - [`TaskGroup::add_post_run_dependent_task_group`] schedules another
//!   group *after* this one, preserving correctness for parents that were
//!   wired earlier by interposing a proxy root;
//! - [`TaskGroup::invoke_async`] streams results of everything reachable
//!   from the invoked group, in completion order.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use taskdag::{FnTaskItem, TaskGroup, TerminationStrategy};
//!
//! # async fn demo() -> taskdag::Result<()> {
//! let fetch = TaskGroup::new(
//!     "fetch",
//!     FnTaskItem::new(|_ctx| Ok("fetched".to_string())),
//!     TerminationStrategy::default(),
//! );
//! let build = TaskGroup::new(
//!     "build",
//!     FnTaskItem::new(|_ctx| Ok("built".to_string())),
//!     TerminationStrategy::default(),
//! );
//! build.add_dependency_task_group(&fetch)?;
//!
//! let ctx = build.new_invocation_context();
//! let mut results = build.invoke_async(&ctx);
//! while let Some(result) = results.next().await {
//!     println!("{}", result?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! State is in-memory and a scheduler instance is single-process. DAG
//! mutation is logically single-threaded; work items run concurrently on
//! the Tokio executor.

pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod group;
pub mod item;

pub use context::InvocationContext;
pub use dag::{EntryKey, EntryState, TaskDag, TaskEntry};
pub use engine::TerminationStrategy;
pub use errors::{Result, TaskDagError};
pub use group::TaskGroup;
pub use item::{FnTaskItem, TaskItem, TaskItemOutput};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
/// Group and entry state stays structurally valid across panics: every
/// write section re-validates what it reads.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
