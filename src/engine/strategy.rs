// src/engine/strategy.rs

use std::str::FromStr;

/// Policy governing the invocation driver once a work item faults.
///
/// - `TerminateOnInProgressCompletion`: stop dispatching new entries,
///   let already-in-progress ones finish, then surface the failure on the
///   output stream (default behaviour).
/// - `TerminateOnHubCompletion`: keep dispatching entries that are not
///   transitively downstream of the faulted one; surface every collected
///   failure once the reachable work is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationStrategy {
    #[default]
    TerminateOnInProgressCompletion,
    TerminateOnHubCompletion,
}

impl FromStr for TerminationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in-progress-completion" => Ok(TerminationStrategy::TerminateOnInProgressCompletion),
            "hub-completion" => Ok(TerminationStrategy::TerminateOnHubCompletion),
            other => Err(format!(
                "invalid termination strategy: {other} (expected \"in-progress-completion\" or \"hub-completion\")"
            )),
        }
    }
}

impl std::fmt::Display for TerminationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationStrategy::TerminateOnInProgressCompletion => {
                write!(f, "in-progress-completion")
            }
            TerminationStrategy::TerminateOnHubCompletion => write!(f, "hub-completion"),
        }
    }
}
