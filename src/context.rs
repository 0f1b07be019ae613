// src/context.rs

//! Per-invocation shared state.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mutable key-value bag shared by every work item of one invocation.
///
/// A fresh context is created per `invoke_async` call (via
/// [`crate::TaskGroup::new_invocation_context`]). Cloning the context
/// clones the handle, not the contents. Values are stored type-erased;
/// readers downcast with [`InvocationContext::get`].
///
/// Work items that mutate the context concurrently are responsible for
/// coordinating what they store; the bag itself is internally locked.
#[derive(Clone, Default)]
pub struct InvocationContext {
    values: Arc<Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn put<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let mut guard = match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(key.into(), Arc::new(value));
    }

    /// Fetch the value under `key`, if present and of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let guard = match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(key).cloned()?.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        let guard = match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.contains_key(key)
    }

    /// Remove and return the value under `key`.
    pub fn remove(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        let mut guard = match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(key)
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = match self.values.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        f.debug_struct("InvocationContext").field("len", &len).finish()
    }
}
