use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::types::CheckResult;

/// Thread-safe mapping from check name to its latest result.
///
/// Writers are the check executors; readers are the exposition endpoint and
/// the system-metrics task. Last writer wins, no history.
#[derive(Clone, Default)]
pub struct ResultStore {
    inner: Arc<RwLock<HashMap<String, CheckResult>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, result: CheckResult) {
        let mut map = self.inner.write().unwrap();
        map.insert(result.name.clone(), result);
    }

    pub fn get(&self, name: &str) -> Option<CheckResult> {
        self.inner.read().unwrap().get(name).cloned()
    }

    /// Snapshot of every latest result, keyed by check name
    pub fn snapshot(&self) -> HashMap<String, CheckResult> {
        self.inner.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}
