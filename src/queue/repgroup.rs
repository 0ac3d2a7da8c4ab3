use std::collections::{HashMap, HashSet};

/// Secondary index from reporting group to the keys currently filed under
/// it. A key appears under exactly one group at a time: its job's current
/// RepGroup.
#[derive(Debug, Default)]
pub struct RepGroupIndex {
    lookup: HashMap<String, HashSet<String>>,
}

impl RepGroupIndex {
    pub fn put(&mut self, rep_group: &str, key: &str) {
        self.lookup
            .entry(rep_group.to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub fn remove(&mut self, rep_group: &str, key: &str) {
        if let Some(keys) = self.lookup.get_mut(rep_group) {
            keys.remove(key);
            if keys.is_empty() {
                self.lookup.remove(rep_group);
            }
        }
    }

    /// Move `key` from one group to another in a single step, so no reader
    /// sees it under both or neither.
    pub fn reassign(&mut self, old: &str, new: &str, key: &str) {
        self.remove(old, key);
        self.put(new, key);
    }

    /// Point-in-time snapshot of a group's keys. Iterating the snapshot is
    /// safe while the index itself keeps changing.
    pub fn lookup(&self, rep_group: &str) -> HashSet<String> {
        self.lookup.get(rep_group).cloned().unwrap_or_default()
    }
}
