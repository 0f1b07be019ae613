// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Structural errors (`CycleDetected`, `DuplicateKey`, `UnknownKey`,
//! `InvalidState`) are raised synchronously from the offending call and
//! leave the graph unmodified. `WorkItemFailed` is only ever surfaced
//! through the invocation output stream.

use thiserror::Error;

use crate::dag::EntryKey;

#[derive(Error, Debug)]
pub enum TaskDagError {
    /// Adding the edge `from -> to` would close a cycle.
    #[error("cycle detected: adding dependency '{from}' -> '{to}' would close a cycle")]
    CycleDetected { from: EntryKey, to: EntryKey },

    /// An entry with this key already exists in the target DAG.
    #[error("duplicate entry key '{0}' in DAG")]
    DuplicateKey(EntryKey),

    /// The key does not resolve to an entry in this DAG.
    #[error("unknown entry key '{0}'")]
    UnknownKey(EntryKey),

    /// The operation is not valid for the entry's or group's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A work item's invocation stream produced an error.
    #[error("work item '{key}' failed")]
    WorkItemFailed {
        key: EntryKey,
        #[source]
        cause: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, TaskDagError>;
