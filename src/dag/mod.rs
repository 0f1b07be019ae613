// src/dag/mod.rs

//! Keyed DAG of work-item entries and its topological enumeration.
//!
//! - [`entry`] holds per-node bookkeeping (dependencies, pending counts,
//!   lifecycle state).
//! - [`graph`] owns the node table, the ready queue and the enumeration
//!   cursor, plus the acyclicity checks guarding every mutation.

pub mod entry;
pub mod graph;

pub use entry::{EntryKey, EntryState, TaskEntry};
pub use graph::TaskDag;
