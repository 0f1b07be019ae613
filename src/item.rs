// src/item.rs

//! The work-item capability interface.
//!
//! A [`TaskItem`] is the unit of work held by a DAG entry. The scheduler
//! never looks inside an item; it only calls [`TaskItem::prepare`] before
//! dispatch and consumes the stream returned by [`TaskItem::invoke_async`].

use std::sync::{Arc, Mutex};

use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::context::InvocationContext;

/// Stream of results produced by one work item invocation.
///
/// Most items emit exactly one value; a no-op item emits none. Errors
/// terminate the item and are surfaced through the group's output stream
/// according to the configured [`crate::TerminationStrategy`].
pub type TaskItemOutput<R> = BoxStream<'static, anyhow::Result<R>>;

/// A unit of asynchronous work producing results of type `R`.
pub trait TaskItem<R>: Send + Sync {
    /// The result of the most recent invocation, if any.
    fn result(&self) -> Option<R>;

    /// Side-effecting hook, called once before the item is dispatched.
    fn prepare(&self) {}

    /// Whether the underlying computation is already running.
    ///
    /// Cold items (the default) start when the driver first polls the
    /// stream returned by [`TaskItem::invoke_async`]. Hot items hand out a
    /// view onto work that is already in flight.
    fn is_hot(&self) -> bool {
        false
    }

    /// Produce the invocation stream for this item.
    ///
    /// The returned stream must be `'static`: implementations clone or
    /// `Arc` whatever state they need into it.
    fn invoke_async(&self, context: InvocationContext) -> TaskItemOutput<R>;
}

/// One-shot work item backed by a closure.
///
/// Cold: the closure runs when the scheduler first polls the invocation
/// stream. Its return value is recorded (visible through
/// [`TaskItem::result`]) and emitted as the stream's single element.
pub struct FnTaskItem<R, F> {
    func: Arc<F>,
    produced: Arc<Mutex<Option<R>>>,
}

impl<R, F> FnTaskItem<R, F>
where
    R: Clone + Send + Sync + 'static,
    F: Fn(InvocationContext) -> anyhow::Result<R> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
            produced: Arc::new(Mutex::new(None)),
        }
    }
}

impl<R, F> TaskItem<R> for FnTaskItem<R, F>
where
    R: Clone + Send + Sync + 'static,
    F: Fn(InvocationContext) -> anyhow::Result<R> + Send + Sync + 'static,
{
    fn result(&self) -> Option<R> {
        match self.produced.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn invoke_async(&self, context: InvocationContext) -> TaskItemOutput<R> {
        let func = Arc::clone(&self.func);
        let produced = Arc::clone(&self.produced);
        stream::once(async move {
            let outcome = (func)(context);
            if let Ok(value) = &outcome {
                let mut guard = match produced.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *guard = Some(value.clone());
            }
            outcome
        })
        .boxed()
    }
}
