// src/engine/driver.rs

//! Streaming invocation driver.
//!
//! The driver walks the effective DAG's ready queue, dispatches each ready
//! entry's work item onto the Tokio executor, and forwards produced values
//! into the output stream in completion order. All DAG mutation (ready
//! pops, completion reports) happens on the consumer's task while it polls
//! the stream; only the work items themselves run concurrently.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;

use anyhow::anyhow;
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::InvocationContext;
use crate::dag::TaskEntry;
use crate::engine::TerminationStrategy;
use crate::errors::{Result, TaskDagError};
use crate::group::TaskGroup;
use crate::item::TaskItemOutput;

/// Completion report sent back by a spawned work item.
type ItemOutcome<R> = (TaskEntry<R>, anyhow::Result<Vec<R>>);

const COMPLETION_CHANNEL_CAPACITY: usize = 64;

/// Build the lazy output stream for one invocation of `group`.
pub(crate) fn invoke<R: Send + 'static>(
    group: TaskGroup<R>,
    context: InvocationContext,
) -> BoxStream<'static, Result<R>> {
    let effective = group.effective_group();
    let strategy = effective.termination_strategy();
    group.set_invocation_active(true);
    effective.set_invocation_active(true);
    effective.prepare_for_enumeration();

    info!(
        group = %group.root_key(),
        effective = %effective.root_key(),
        %strategy,
        "starting task group invocation"
    );

    let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
    let driver = InvocationDriver {
        invoked: group,
        effective,
        context,
        strategy,
        completions_tx,
        completions_rx,
        outstanding: 0,
        halted: false,
        buffered: VecDeque::new(),
        errors: VecDeque::new(),
    };

    stream::unfold(driver, |mut driver| async move {
        driver.next_event().await.map(|item| (item, driver))
    })
    .boxed()
}

struct InvocationDriver<R> {
    invoked: TaskGroup<R>,
    effective: TaskGroup<R>,
    context: InvocationContext,
    strategy: TerminationStrategy,
    completions_tx: mpsc::Sender<ItemOutcome<R>>,
    completions_rx: mpsc::Receiver<ItemOutcome<R>>,
    /// Work items dispatched but not yet reported back.
    outstanding: usize,
    /// Set once a fault stops further dispatch.
    halted: bool,
    /// Values produced but not yet emitted.
    buffered: VecDeque<R>,
    /// Failures to surface once the run winds down.
    errors: VecDeque<TaskDagError>,
}

impl<R> Drop for InvocationDriver<R> {
    fn drop(&mut self) {
        self.invoked.set_invocation_active(false);
        self.effective.set_invocation_active(false);
    }
}

impl<R: Send + 'static> InvocationDriver<R> {
    /// Produce the next output-stream element, or `None` when the run is
    /// over.
    async fn next_event(&mut self) -> Option<Result<R>> {
        loop {
            if let Some(value) = self.buffered.pop_front() {
                return Some(Ok(value));
            }
            if !self.halted {
                self.dispatch_ready();
            }
            if self.outstanding == 0 {
                if let Some(error) = self.errors.pop_front() {
                    return Some(Err(error));
                }
                info!(group = %self.invoked.root_key(), "task group invocation finished");
                return None;
            }

            // The driver holds a sender, so `None` cannot happen while
            // work is outstanding.
            let (entry, outcome) = self.completions_rx.recv().await?;
            self.outstanding -= 1;
            match outcome {
                Ok(values) => {
                    if let Err(error) = self.effective.report_completion(&entry) {
                        warn!(key = %entry.key(), error = %error, "completion report rejected");
                        self.errors.push_back(error);
                        self.halted = true;
                        continue;
                    }
                    self.buffered.extend(values);
                }
                Err(cause) => {
                    let key = entry.key();
                    if let Err(error) = self.effective.report_failure(&entry, &cause) {
                        warn!(key = %key, error = %error, "failure report rejected");
                    }
                    self.errors.push_back(TaskDagError::WorkItemFailed { key, cause });
                    if self.strategy == TerminationStrategy::TerminateOnInProgressCompletion {
                        self.halted = true;
                    }
                }
            }
        }
    }

    /// Dispatch every entry currently in the ready queue.
    fn dispatch_ready(&mut self) {
        while let Some(entry) = self.effective.get_next() {
            let item = entry.item();
            debug!(
                key = %entry.key(),
                hot = item.is_hot(),
                "dispatching work item"
            );
            item.prepare();
            // Cold items start when the spawned task first polls the
            // stream; hot items are already running and this just taps
            // their output.
            let item_stream = item.invoke_async(self.context.clone());
            let completions = self.completions_tx.clone();
            self.outstanding += 1;
            tokio::spawn(async move {
                // A panicking item must still report back, or the driver
                // would wait on it forever.
                let outcome = AssertUnwindSafe(collect_item_stream(item_stream))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(anyhow!("work item panicked: {}", panic_message(payload)))
                    });
                // Send fails only if the output stream was dropped; the
                // result is discarded in that case.
                let _ = completions.send((entry, outcome)).await;
            });
        }
    }
}

async fn collect_item_stream<R>(mut item_stream: TaskItemOutput<R>) -> anyhow::Result<Vec<R>> {
    let mut values = Vec::new();
    while let Some(next) = item_stream.next().await {
        values.push(next?);
    }
    Ok(values)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
