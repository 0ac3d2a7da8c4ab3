use std::collections::{HashMap, HashSet};

/// Forward and reverse dependency edges between job keys.
///
/// An edge K1 -> K2 means K2 waits on K1. The index is only ever updated
/// together with the owning item's state transition, under the queue's
/// write exclusion.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    /// Prereq key -> keys waiting on it.
    dependents: HashMap<String, HashSet<String>>,
    /// Waiting key -> prereqs not yet complete.
    outstanding: HashMap<String, HashSet<String>>,
}

impl DependencyIndex {
    /// Record that `key` waits on each of `prereqs`.
    pub fn add_edges(&mut self, key: &str, prereqs: &[String]) {
        for prereq in prereqs {
            self.dependents
                .entry(prereq.clone())
                .or_default()
                .insert(key.to_string());
            self.outstanding
                .entry(key.to_string())
                .or_default()
                .insert(prereq.clone());
        }
    }

    /// Does anything still wait on `key`?
    pub fn has_dependents(&self, key: &str) -> bool {
        self.dependents.get(key).is_some_and(|set| !set.is_empty())
    }

    /// Mark `key` complete. Returns the waiters whose last outstanding
    /// prereq this was; they can go ready now.
    pub fn on_complete(&mut self, key: &str) -> Vec<String> {
        let mut ready = Vec::new();
        if let Some(waiters) = self.dependents.remove(key) {
            for waiter in waiters {
                if let Some(outstanding) = self.outstanding.get_mut(&waiter) {
                    outstanding.remove(key);
                    if outstanding.is_empty() {
                        self.outstanding.remove(&waiter);
                        ready.push(waiter);
                    }
                }
            }
        }
        ready.sort();
        ready
    }

    /// Drop `key` from the index entirely. Callers must have checked
    /// `has_dependents` first; removing a waited-on key would release its
    /// waiters as if it had completed.
    pub fn remove(&mut self, key: &str) {
        if let Some(prereqs) = self.outstanding.remove(key) {
            for prereq in prereqs {
                if let Some(dependents) = self.dependents.get_mut(&prereq) {
                    dependents.remove(key);
                    if dependents.is_empty() {
                        self.dependents.remove(&prereq);
                    }
                }
            }
        }
        self.dependents.remove(key);
    }
}
