pub mod deps;
pub mod item;
pub mod job;
pub mod repgroup;

pub use item::{Item, ItemStats};
pub use job::{job_key, Job, JobState, Requirements};

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::error::{QueueError, Result};
use deps::DependencyIndex;
use repgroup::RepGroupIndex;

const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_TOUCH_GRACE: Duration = Duration::from_secs(60);

/// Keys promoted or flagged by a deadline sweep.
#[derive(Debug, Default)]
pub struct DeadlineSweep {
    /// Delayed items whose back-off passed; now ready.
    pub woken: Vec<String>,
    /// Running items whose heartbeat lapsed; now shown as lost.
    pub lost: Vec<String>,
}

/// The in-memory job queue: item store, state machine, dependency and
/// RepGroup indexes.
///
/// The queue itself is not synchronized; the manager wraps it in a
/// reader-writer lock so queries run in parallel and transitions are
/// linearizable per key.
#[derive(Debug)]
pub struct Queue {
    items: HashMap<String, Item>,
    deps: DependencyIndex,
    rep_groups: RepGroupIndex,
    next_seq: u64,
    /// Back-off before a released job goes ready again.
    requeue_delay: Duration,
    /// How long a running job may go untouched before counting as lost.
    touch_grace: Duration,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_REQUEUE_DELAY, DEFAULT_TOUCH_GRACE)
    }

    pub fn with_timeouts(requeue_delay: Duration, touch_grace: Duration) -> Self {
        Self {
            items: HashMap::new(),
            deps: DependencyIndex::default(),
            rep_groups: RepGroupIndex::default(),
            next_seq: 0,
            requeue_delay,
            touch_grace,
        }
    }

    /// Add a job. It enters Dependent if any of its dependencies are still
    /// incomplete, Ready otherwise. A dependency key absent from the store
    /// counts as satisfied: its job completed and was reaped before this
    /// one arrived.
    pub fn add(&mut self, mut job: Job) -> Result<JobState> {
        if self.items.contains_key(&job.key) {
            return Err(QueueError::AlreadyExists(job.key));
        }

        job.until_buried = job.retries + 1;
        let unresolved: Vec<String> = job
            .dependencies
            .iter()
            .filter(|dep| {
                self.items
                    .get(*dep)
                    .is_some_and(|item| item.state() != JobState::Complete)
            })
            .cloned()
            .collect();

        job.state = if unresolved.is_empty() {
            JobState::Ready
        } else {
            JobState::Dependent
        };
        if !unresolved.is_empty() {
            self.deps.add_edges(&job.key, &unresolved);
        }
        self.rep_groups.put(&job.rep_group, &job.key);

        let state = job.state;
        let key = job.key.clone();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.insert(key, Item::new(job, seq));
        Ok(state)
    }

    pub fn get(&self, key: &str) -> Option<&Item> {
        self.items.get(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items_in_state(&self, state: JobState) -> Vec<&Item> {
        let mut items: Vec<&Item> = self
            .items
            .values()
            .filter(|item| item.state() == state)
            .collect();
        items.sort_by_key(|item| item.seq);
        items
    }

    /// Take the next ready job: highest priority first, insertion order
    /// within a priority. The item moves to Reserved.
    pub fn reserve(&mut self) -> Option<Job> {
        let key = self
            .items
            .values()
            .filter(|item| item.state() == JobState::Ready)
            .max_by(|a, b| {
                a.job
                    .priority
                    .cmp(&b.job.priority)
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|item| item.job.key.clone())?;

        let item = self.items.get_mut(&key)?;
        item.job.state = JobState::Reserved;
        Some(item.job.clone())
    }

    /// A runner picked the reserved job up.
    pub fn start(
        &mut self,
        key: &str,
        host: &str,
        host_id: &str,
        host_ip: &str,
        pid: u32,
    ) -> Result<()> {
        let touch_grace = self.touch_grace;
        let item = self.item_in_state(key, JobState::Reserved, "reserved")?;
        item.job.state = JobState::Running;
        item.job.attempts += 1;
        item.job.exited = false;
        item.job.lost = false;
        item.job.host = host.to_string();
        item.job.host_id = host_id.to_string();
        item.job.host_ip = host_ip.to_string();
        item.job.pid = pid;
        item.job.start_time = Some(Utc::now());
        item.job.end_time = None;
        item.release_deadline = Some(Instant::now() + touch_grace);
        Ok(())
    }

    /// Runner heartbeat: push the release deadline out. A lost job that
    /// turns out to still be alive goes back to plain running.
    pub fn touch(&mut self, key: &str) -> Result<()> {
        let touch_grace = self.touch_grace;
        let item = self.item_in_state(key, JobState::Running, "running")?;
        item.job.lost = false;
        item.release_deadline = Some(Instant::now() + touch_grace);
        Ok(())
    }

    /// The job failed. It backs off in Delay, or goes to Buried once its
    /// failures are exhausted. Returns the state it landed in.
    pub fn release(&mut self, key: &str, exitcode: i32, fail_reason: &str) -> Result<JobState> {
        let requeue_delay = self.requeue_delay;
        let item = self.item_in_state(key, JobState::Running, "running")?;
        record_exit(&mut item.job, exitcode, fail_reason);
        item.release_deadline = None;
        item.job.until_buried = item.job.until_buried.saturating_sub(1);
        if item.job.until_buried == 0 {
            item.job.state = JobState::Buried;
        } else {
            item.job.state = JobState::Delay;
            item.delay_until = Some(Instant::now() + requeue_delay);
        }
        Ok(item.job.state)
    }

    /// Fail the job straight to Buried, skipping the Delay back-off.
    pub fn bury(&mut self, key: &str, exitcode: i32, fail_reason: &str) -> Result<()> {
        let item = self.item_in_state(key, JobState::Running, "running")?;
        record_exit(&mut item.job, exitcode, fail_reason);
        item.release_deadline = None;
        item.job.state = JobState::Buried;
        Ok(())
    }

    /// The job finished cleanly. Dependents whose last prereq this was are
    /// promoted to Ready; their keys are returned.
    pub fn complete(&mut self, key: &str) -> Result<Vec<String>> {
        let item = self.item_in_state(key, JobState::Running, "running")?;
        record_exit(&mut item.job, 0, "");
        item.release_deadline = None;
        item.job.state = JobState::Complete;

        let ready = self.deps.on_complete(key);
        for ready_key in &ready {
            if let Some(dependent) = self.items.get_mut(ready_key) {
                dependent.job.state = JobState::Ready;
            }
        }
        Ok(ready)
    }

    /// Promote a buried job back to Ready and restore its failure budget.
    pub fn kick(&mut self, key: &str) -> Result<()> {
        let item = self.item_in_state(key, JobState::Buried, "buried")?;
        item.job.state = JobState::Ready;
        item.job.until_buried = item.job.retries + 1;
        Ok(())
    }

    pub fn has_dependents(&self, key: &str) -> Result<bool> {
        if !self.items.contains_key(key) {
            return Err(QueueError::NotFound(key.to_string()));
        }
        Ok(self.deps.has_dependents(key))
    }

    /// Remove an item. Only allowed in Buried, Delay, Dependent or Ready,
    /// and only when nothing depends on it: the queue would treat the
    /// removal as completion and release waiters early.
    ///
    /// The RepGroup index entry is left for the caller, which typically
    /// iterates a group snapshot and reaps the index afterwards with
    /// [`Queue::forget_rep_group_keys`].
    pub fn remove(&mut self, key: &str) -> Result<Job> {
        let item = self
            .items
            .get(key)
            .ok_or_else(|| QueueError::NotFound(key.to_string()))?;
        match item.state() {
            JobState::Buried | JobState::Delay | JobState::Dependent | JobState::Ready => {}
            state => {
                return Err(QueueError::WrongState {
                    key: key.to_string(),
                    state,
                    required: "buried, delay, dependent or ready",
                })
            }
        }
        if self.deps.has_dependents(key) {
            return Err(QueueError::HasDependents(key.to_string()));
        }

        self.deps.remove(key);
        let item = self.items.remove(key).expect("item checked above");
        Ok(item.job)
    }

    /// Drop removed keys from a RepGroup after a batch finished iterating
    /// its snapshot.
    pub fn forget_rep_group_keys(&mut self, rep_group: &str, keys: &[String]) {
        for key in keys {
            self.rep_groups.remove(rep_group, key);
        }
    }

    /// Re-file a job under a new RepGroup; both index entries move in one
    /// step.
    pub fn set_rep_group(&mut self, key: &str, rep_group: &str) -> Result<()> {
        let item = self
            .items
            .get_mut(key)
            .ok_or_else(|| QueueError::NotFound(key.to_string()))?;
        let old = std::mem::replace(&mut item.job.rep_group, rep_group.to_string());
        self.rep_groups.reassign(&old, rep_group, key);
        Ok(())
    }

    pub fn rep_group_keys(&self, rep_group: &str) -> HashSet<String> {
        self.rep_groups.lookup(rep_group)
    }

    /// Wake delayed items whose back-off passed and flag running items
    /// whose heartbeat lapsed as lost. Lost is a display projection: the
    /// item stays Running.
    pub fn process_deadlines(&mut self, now: Instant) -> DeadlineSweep {
        let mut sweep = DeadlineSweep::default();
        for item in self.items.values_mut() {
            match item.state() {
                JobState::Delay => {
                    if item.delay_until.is_some_and(|until| until <= now) {
                        item.delay_until = None;
                        item.job.state = JobState::Ready;
                        sweep.woken.push(item.job.key.clone());
                    }
                }
                JobState::Running => {
                    if !item.job.lost
                        && item.release_deadline.is_some_and(|deadline| deadline <= now)
                    {
                        item.job.lost = true;
                        sweep.lost.push(item.job.key.clone());
                    }
                }
                _ => {}
            }
        }
        sweep.woken.sort();
        sweep.lost.sort();
        sweep
    }

    /// Snapshot of every job not yet complete, in insertion order.
    pub fn jobs_current(&self) -> Vec<Job> {
        let mut items: Vec<&Item> = self
            .items
            .values()
            .filter(|item| item.state() != JobState::Complete)
            .collect();
        items.sort_by_key(|item| item.seq);
        items.iter().map(|item| item.job.clone()).collect()
    }

    /// Snapshot of a group's completed jobs.
    pub fn complete_jobs_by_rep_group(&self, rep_group: &str) -> Vec<Job> {
        let mut jobs: Vec<(u64, Job)> = self
            .rep_groups
            .lookup(rep_group)
            .iter()
            .filter_map(|key| self.items.get(key))
            .filter(|item| item.state() == JobState::Complete)
            .map(|item| (item.seq, item.job.clone()))
            .collect();
        jobs.sort_by_key(|(seq, _)| *seq);
        jobs.into_iter().map(|(_, job)| job).collect()
    }

    /// Look jobs up by key; unknown keys are reported, not an error.
    pub fn jobs_by_keys(&self, keys: &[String]) -> (Vec<Job>, Vec<String>) {
        let mut jobs = Vec::new();
        let mut missing = Vec::new();
        for key in keys {
            match self.items.get(key) {
                Some(item) => jobs.push(item.job.clone()),
                None => missing.push(key.clone()),
            }
        }
        (jobs, missing)
    }

    /// Representative sample of a group's jobs: up to `limit` per distinct
    /// (state, exitcode, fail reason), with each sample's `similar` count
    /// set to how many more looked the same. A limit of zero returns every
    /// job. A `lost` filter matches running jobs whose heartbeat lapsed.
    pub fn jobs_by_rep_group(
        &self,
        rep_group: &str,
        limit: usize,
        state: Option<JobState>,
    ) -> Vec<Job> {
        let mut items: Vec<&Item> = self
            .rep_groups
            .lookup(rep_group)
            .iter()
            .filter_map(|key| self.items.get(key))
            .filter(|item| match state {
                None => true,
                Some(JobState::Lost) => item.state() == JobState::Running && item.job.lost,
                Some(want) => item.state() == want,
            })
            .collect();
        items.sort_by_key(|item| item.seq);

        if limit == 0 {
            return items.iter().map(|item| item.job.clone()).collect();
        }

        let mut counts: HashMap<(JobState, i32, String), usize> = HashMap::new();
        let mut jobs: Vec<Job> = Vec::new();
        let mut first_of: HashMap<(JobState, i32, String), usize> = HashMap::new();
        for item in items {
            let triple = (
                item.state(),
                item.job.exitcode,
                item.job.fail_reason.clone(),
            );
            let seen = counts.entry(triple.clone()).or_insert(0);
            *seen += 1;
            if *seen <= limit {
                if *seen == 1 {
                    first_of.insert(triple, jobs.len());
                }
                jobs.push(item.job.clone());
            }
        }
        for (triple, index) in first_of {
            let total = counts[&triple];
            jobs[index].similar = total.saturating_sub(limit) as u32;
        }
        jobs
    }

    fn item_in_state(
        &mut self,
        key: &str,
        required: JobState,
        required_name: &'static str,
    ) -> Result<&mut Item> {
        let item = self
            .items
            .get_mut(key)
            .ok_or_else(|| QueueError::NotFound(key.to_string()))?;
        if item.job.state != required {
            return Err(QueueError::WrongState {
                key: key.to_string(),
                state: item.job.state,
                required: required_name,
            });
        }
        Ok(item)
    }
}

fn record_exit(job: &mut Job, exitcode: i32, fail_reason: &str) {
    job.exited = true;
    job.exitcode = exitcode;
    job.fail_reason = fail_reason.to_string();
    job.lost = false;
    let ended = Utc::now();
    job.end_time = Some(ended);
    if let Some(started) = job.start_time {
        job.wall_time_secs = (ended - started).num_milliseconds() as f64 / 1000.0;
    }
}
