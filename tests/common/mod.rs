#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use taskdag::{
    InvocationContext, TaskGroup, TaskItem, TaskItemOutput, TerminationStrategy,
};

/// Opt-in log output while debugging a test run.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Work item that emits its own name, recording invocations and prepare
/// calls.
pub struct NamedTaskItem {
    name: String,
    produced: Arc<Mutex<Option<String>>>,
    prepare_calls: Arc<AtomicUsize>,
    invocations: Arc<AtomicUsize>,
}

impl NamedTaskItem {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            produced: Arc::new(Mutex::new(None)),
            prepare_calls: Arc::new(AtomicUsize::new(0)),
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (
            Arc::clone(&self.prepare_calls),
            Arc::clone(&self.invocations),
        )
    }
}

impl TaskItem<String> for NamedTaskItem {
    fn result(&self) -> Option<String> {
        self.produced.lock().unwrap().clone()
    }

    fn prepare(&self) {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn invoke_async(&self, _context: InvocationContext) -> TaskItemOutput<String> {
        let name = self.name.clone();
        let produced = Arc::clone(&self.produced);
        let invocations = Arc::clone(&self.invocations);
        stream::once(async move {
            invocations.fetch_add(1, Ordering::SeqCst);
            *produced.lock().unwrap() = Some(name.clone());
            Ok(name)
        })
        .boxed()
    }
}

/// Work item whose invocation stream yields an error.
pub struct FailingTaskItem {
    message: String,
}

impl FailingTaskItem {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl TaskItem<String> for FailingTaskItem {
    fn result(&self) -> Option<String> {
        None
    }

    fn invoke_async(&self, _context: InvocationContext) -> TaskItemOutput<String> {
        let message = self.message.clone();
        stream::once(async move { Err(anyhow::anyhow!(message)) }).boxed()
    }
}

/// Hot work item: the value is computed before invocation; the stream just
/// taps it.
pub struct HotTaskItem {
    value: String,
}

impl HotTaskItem {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
        }
    }
}

impl TaskItem<String> for HotTaskItem {
    fn result(&self) -> Option<String> {
        Some(self.value.clone())
    }

    fn is_hot(&self) -> bool {
        true
    }

    fn invoke_async(&self, _context: InvocationContext) -> TaskItemOutput<String> {
        let value = self.value.clone();
        stream::once(async move { Ok(value) }).boxed()
    }
}

pub fn named_group(key: &str) -> TaskGroup<String> {
    TaskGroup::new(key, NamedTaskItem::new(key), TerminationStrategy::default())
}

/// Build the six-node sample group used throughout the scenarios:
///
/// ```text
///   |------------------->v2------------|
///   |                                  v
///   v6            ------->v3---------->v1
///   |             |                    ^
///   |------------>v5                   |
///                 |                    |
///                 ------->v4------------
/// ```
///
/// `keys[0]` is the sink, `keys[5]` the root; the root group is returned.
pub fn sample_task_group(keys: [&str; 6]) -> TaskGroup<String> {
    let g1 = named_group(keys[0]);
    let g2 = named_group(keys[1]);
    let g3 = named_group(keys[2]);
    let g4 = named_group(keys[3]);
    let g5 = named_group(keys[4]);
    let g6 = named_group(keys[5]);

    g2.add_dependency_task_group(&g1).unwrap();
    g3.add_dependency_task_group(&g1).unwrap();
    g4.add_dependency_task_group(&g1).unwrap();

    g5.add_dependency_task_group(&g3).unwrap();
    g5.add_dependency_task_group(&g4).unwrap();

    g6.add_dependency_task_group(&g2).unwrap();
    g6.add_dependency_task_group(&g5).unwrap();

    g6
}

/// Constraint table: for each expected key, the keys that must NOT have
/// been emitted yet at the moment it is emitted.
pub type ForbiddenBefore<'a> = HashMap<&'a str, Vec<&'a str>>;

pub fn forbid<'a>(map: &mut ForbiddenBefore<'a>, key: &'a str, later: &[&'a str]) {
    map.insert(key, later.to_vec());
}

/// Run a full enumeration, checking the constraint table at every step and
/// the emitted set at the end.
pub fn enumerate_checking(group: &TaskGroup<String>, forbidden: &ForbiddenBefore<'_>) {
    group.prepare_for_enumeration();
    let mut seen: HashSet<String> = HashSet::new();
    while let Some(entry) = group.get_next() {
        let key = entry.key();
        assert!(
            forbidden.contains_key(key.as_str()),
            "unexpected key '{key}' emitted"
        );
        assert!(!seen.contains(&key), "key '{key}' emitted twice");
        for later in &forbidden[key.as_str()] {
            assert!(
                !seen.contains(*later),
                "'{later}' must be emitted after '{key}'"
            );
        }
        seen.insert(key);
        group.report_completion(&entry).unwrap();
    }
    assert!(
        group.is_enumeration_complete(),
        "enumeration stopped with work still pending"
    );
    assert_eq!(
        seen.len(),
        forbidden.len(),
        "emitted set does not cover every expected key"
    );
}

/// Enumerate and return the emitted keys in order.
pub fn enumerate_keys(group: &TaskGroup<String>) -> Vec<String> {
    group.prepare_for_enumeration();
    let mut keys = Vec::new();
    while let Some(entry) = group.get_next() {
        keys.push(entry.key());
        group.report_completion(&entry).unwrap();
    }
    keys
}

/// Collect an invocation stream, panicking on stream errors.
pub async fn collect_values(group: &TaskGroup<String>) -> Vec<String> {
    let ctx = group.new_invocation_context();
    let mut stream = group.invoke_async(&ctx);
    let mut values = Vec::new();
    while let Some(result) = stream.next().await {
        values.push(result.expect("work item failed"));
    }
    values
}

pub fn position(values: &[String], key: &str) -> usize {
    values
        .iter()
        .position(|value| value == key)
        .unwrap_or_else(|| panic!("'{key}' missing from {values:?}"))
}
