//! Device state cache with dirty tracking

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

/// Cache of reported device properties plus the set of keys whose local
/// value has not yet been pushed to the device
///
/// Values written locally (`set_local`) are marked dirty until a command
/// acknowledgement clears them; values reported by the device
/// (`apply_report`) never dirty the cache. The dirty set is ordered so
/// command payloads are deterministic.
#[derive(Debug, Default)]
pub struct PropertyCache {
    values: HashMap<String, Value>,
    dirty: BTreeSet<String>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    /// Record a locally intended value and mark the key dirty
    pub fn set_local(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        self.dirty.insert(key.to_string());
    }

    /// Merge a device-reported state snapshot without dirtying anything
    pub fn apply_report<'a>(&mut self, report: impl IntoIterator<Item = (&'a str, Value)>) {
        for (key, value) in report {
            self.values.insert(key.to_string(), value);
        }
    }

    /// Keys pending a push, in wire-deterministic order
    pub fn dirty_keys(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Clear dirty state for keys the device acknowledged
    pub fn mark_clean<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            self.dirty.remove(key);
        }
    }
}
