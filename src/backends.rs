//! Seams to the external collaborators the queue core drives: the job
//! database, the scheduler backend and provisioned cloud servers. The real
//! implementations live outside this crate; the in-process ones here keep
//! enough state to be observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::Result;

/// Sink for live-job records held by the persistent database.
pub trait PersistenceSink: Send + Sync {
    /// Drop the live record of a removed job.
    fn delete_live_job(&self, key: &str) -> Result<()>;
}

/// Adapter over a scheduler backend: per-group demand counters and job
/// termination.
pub trait SchedulerAdapter: Send + Sync {
    fn increment_group_count(&self, group: &str);

    fn decrement_group_count(&self, group: &str);

    /// Ask the backend to terminate a running job. Best-effort.
    fn kill_job(&self, key: &str) -> Result<()>;
}

/// In-memory persistence sink. The real database is external; this records
/// deletions so callers and tests can observe them.
#[derive(Debug, Default)]
pub struct MemorySink {
    deleted: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

impl PersistenceSink for MemorySink {
    fn delete_live_job(&self, key: &str) -> Result<()> {
        tracing::debug!(key, "deleting live job record");
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// In-process scheduler adapter: keeps the per-group demand counters and
/// records kill requests. Provisioning itself happens elsewhere.
#[derive(Debug, Default)]
pub struct LocalScheduler {
    counts: Mutex<HashMap<String, i64>>,
    killed: Mutex<Vec<String>>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_count(&self, group: &str) -> i64 {
        self.counts.lock().unwrap().get(group).copied().unwrap_or(0)
    }

    pub fn killed_jobs(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }
}

impl SchedulerAdapter for LocalScheduler {
    fn increment_group_count(&self, group: &str) {
        let mut counts = self.counts.lock().unwrap();
        *counts.entry(group.to_string()).or_insert(0) += 1;
    }

    fn decrement_group_count(&self, group: &str) {
        let mut counts = self.counts.lock().unwrap();
        *counts.entry(group.to_string()).or_insert(0) -= 1;
    }

    fn kill_job(&self, key: &str) -> Result<()> {
        tracing::debug!(key, "requesting job termination");
        self.killed.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Handle on a provisioned cloud server, as reported by the infrastructure
/// layer.
#[derive(Debug)]
pub struct CloudServer {
    pub id: String,
    pub name: String,
    pub ip: String,
    bad: AtomicBool,
    destroyed: AtomicBool,
}

impl CloudServer {
    pub fn new(id: impl Into<String>, name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ip: ip.into(),
            bad: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn mark_bad(&self) {
        self.bad.store(true, Ordering::SeqCst);
    }

    pub fn is_bad(&self) -> bool {
        self.bad.load(Ordering::SeqCst)
    }

    /// Tear the server down. Effective at most once; returns whether this
    /// call was the one that did it.
    pub fn destroy(&self) -> bool {
        !self.destroyed.swap(true, Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}
