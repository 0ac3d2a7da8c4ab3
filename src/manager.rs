//! The manager ties the queue, the broadcasters and the collaborator
//! registries together, and owns the background deadline sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::backends::{CloudServer, PersistenceSink, SchedulerAdapter};
use crate::broadcast::Broadcaster;
use crate::config::ManagerConfig;
use crate::error::Result;
use crate::queue::{Job, JobState, Queue};
use crate::status::message::{BadServer, SchedulerIssue};
use crate::status::server::run_status_server;
use crate::status::view::JobStatus;

struct BadServerEntry {
    server: Arc<CloudServer>,
    info: BadServer,
}

pub struct Manager {
    config: ManagerConfig,
    queue: RwLock<Queue>,
    status_caster: Broadcaster<JobStatus>,
    bad_server_caster: Broadcaster<BadServer>,
    sched_issue_caster: Broadcaster<SchedulerIssue>,
    bad_servers: Mutex<HashMap<String, BadServerEntry>>,
    sched_issues: Mutex<HashMap<String, SchedulerIssue>>,
    db: Arc<dyn PersistenceSink>,
    scheduler: Arc<dyn SchedulerAdapter>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        db: Arc<dyn PersistenceSink>,
        scheduler: Arc<dyn SchedulerAdapter>,
    ) -> Self {
        let buffer = config.subscriber_buffer;
        Self {
            queue: RwLock::new(Queue::with_timeouts(
                config.requeue_delay,
                config.touch_grace,
            )),
            status_caster: Broadcaster::new("status", buffer),
            bad_server_caster: Broadcaster::new("badservers", buffer),
            sched_issue_caster: Broadcaster::new("schedulerissues", buffer),
            bad_servers: Mutex::new(HashMap::new()),
            sched_issues: Mutex::new(HashMap::new()),
            db,
            scheduler,
            config,
        }
    }

    pub fn status_caster(&self) -> &Broadcaster<JobStatus> {
        &self.status_caster
    }

    pub fn bad_server_caster(&self) -> &Broadcaster<BadServer> {
        &self.bad_server_caster
    }

    pub fn sched_issue_caster(&self) -> &Broadcaster<SchedulerIssue> {
        &self.sched_issue_caster
    }

    /// Run the manager: spawns the deadline sweep and serves the status
    /// interface until the token is cancelled. SIGTERM and SIGINT cancel
    /// the token too, so both paths tear down the server, the sweep and
    /// every connected session together.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> std::io::Result<()> {
        cancel_on_signals(shutdown.clone());

        let sweeper = self.clone();
        let sweep_shutdown = shutdown.clone();
        tokio::spawn(async move {
            sweeper.deadline_loop(sweep_shutdown).await;
        });

        run_status_server(self.config.listen_addr, self, shutdown).await
    }

    /// Periodically wake delayed jobs and flag silent runners as lost,
    /// pushing a status update for each affected job.
    async fn deadline_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.deadline_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }

            self.sweep_deadlines(Instant::now()).await;
        }
    }

    /// Wake delayed jobs whose back-off passed and flag silent runners as
    /// lost, pushing a status update for each affected job. Returns how
    /// many jobs were touched.
    pub async fn sweep_deadlines(&self, now: Instant) -> usize {
        let statuses = {
            let mut queue = self.queue.write().await;
            let sweep = queue.process_deadlines(now);
            if !sweep.lost.is_empty() {
                tracing::warn!(count = sweep.lost.len(), "running jobs lost their heartbeat");
            }
            sweep
                .woken
                .iter()
                .chain(sweep.lost.iter())
                .filter_map(|key| queue.get(key).map(|item| JobStatus::from_job(&item.job)))
                .collect::<Vec<_>>()
        };
        for status in &statuses {
            self.status_caster.publish(status);
        }
        statuses.len()
    }

    // --- intake and runner-facing transitions -------------------------------

    /// Add jobs to the queue. Jobs landing in Ready or Delay register
    /// demand with the scheduler. Returns how many were added; duplicates
    /// are skipped.
    pub async fn add_jobs(&self, jobs: Vec<Job>) -> usize {
        let mut statuses = Vec::new();
        let mut demand = Vec::new();
        {
            let mut queue = self.queue.write().await;
            for job in jobs {
                let key = job.key.clone();
                let group = job.scheduler_group.clone();
                match queue.add(job) {
                    Ok(state) => {
                        if matches!(state, JobState::Ready | JobState::Delay) {
                            demand.push(group);
                        }
                        if let Some(item) = queue.get(&key) {
                            statuses.push(JobStatus::from_job(&item.job));
                        }
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "job not added");
                    }
                }
            }
        }
        let added = statuses.len();
        for group in demand {
            self.scheduler.increment_group_count(&group);
        }
        for status in &statuses {
            self.status_caster.publish(status);
        }
        added
    }

    /// Reserve the next ready job for a runner.
    pub async fn reserve_job(&self) -> Option<Job> {
        let job = self.queue.write().await.reserve()?;
        self.status_caster.publish(&JobStatus::from_job(&job));
        Some(job)
    }

    pub async fn start_job(
        &self,
        key: &str,
        host: &str,
        host_id: &str,
        host_ip: &str,
        pid: u32,
    ) -> Result<()> {
        let status = {
            let mut queue = self.queue.write().await;
            queue.start(key, host, host_id, host_ip, pid)?;
            queue.get(key).map(|item| JobStatus::from_job(&item.job))
        };
        if let Some(status) = status {
            self.status_caster.publish(&status);
        }
        Ok(())
    }

    pub async fn touch_job(&self, key: &str) -> Result<()> {
        self.queue.write().await.touch(key)
    }

    /// Fail a running job back to Delay, or to Buried once its failures
    /// are exhausted.
    pub async fn release_job(
        &self,
        key: &str,
        exitcode: i32,
        fail_reason: &str,
    ) -> Result<JobState> {
        let (state, status) = {
            let mut queue = self.queue.write().await;
            let state = queue.release(key, exitcode, fail_reason)?;
            (state, queue.get(key).map(|item| JobStatus::from_job(&item.job)))
        };
        if let Some(status) = status {
            self.status_caster.publish(&status);
        }
        Ok(state)
    }

    pub async fn bury_job(&self, key: &str, exitcode: i32, fail_reason: &str) -> Result<()> {
        let status = {
            let mut queue = self.queue.write().await;
            queue.bury(key, exitcode, fail_reason)?;
            queue.get(key).map(|item| JobStatus::from_job(&item.job))
        };
        if let Some(status) = status {
            self.status_caster.publish(&status);
        }
        Ok(())
    }

    /// Complete a running job. Dependents it was the last prereq for go
    /// Ready and register demand.
    pub async fn complete_job(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        let (statuses, demand) = {
            let mut queue = self.queue.write().await;
            let ready = queue.complete(&key)?;
            let mut statuses = Vec::new();
            let mut demand = Vec::new();
            for affected in std::iter::once(&key).chain(ready.iter()) {
                if let Some(item) = queue.get(affected) {
                    statuses.push(JobStatus::from_job(&item.job));
                }
            }
            for ready_key in &ready {
                if let Some(item) = queue.get(ready_key) {
                    demand.push(item.job.scheduler_group.clone());
                }
            }
            (statuses, demand)
        };
        for group in demand {
            self.scheduler.increment_group_count(&group);
        }
        for status in &statuses {
            self.status_caster.publish(status);
        }
        Ok(())
    }

    /// Re-file a job under a new RepGroup, as happens when the same
    /// command is resubmitted under a different label.
    pub async fn set_rep_group(&self, key: &str, rep_group: &str) -> Result<()> {
        let status = {
            let mut queue = self.queue.write().await;
            queue.set_rep_group(key, rep_group)?;
            queue.get(key).map(|item| JobStatus::from_job(&item.job))
        };
        if let Some(status) = status {
            self.status_caster.publish(&status);
        }
        Ok(())
    }

    // --- status page bulk operations ----------------------------------------

    /// Kick every buried job in the RepGroup whose exitcode and fail
    /// reason match. With `all` false, stop after the first one kicked.
    /// Returns how many were kicked.
    pub async fn retry_jobs(
        &self,
        rep_group: &str,
        exitcode: i32,
        fail_reason: &str,
        all: bool,
    ) -> usize {
        let (statuses, demand) = {
            let mut queue = self.queue.write().await;
            let keys = queue.rep_group_keys(rep_group);
            let mut statuses = Vec::new();
            let mut demand = Vec::new();
            for key in keys {
                let Some(item) = queue.get(&key) else { continue };
                if item.state() != JobState::Buried
                    || item.job.exitcode != exitcode
                    || item.job.fail_reason != fail_reason
                {
                    continue;
                }
                match queue.kick(&key) {
                    Ok(()) => {
                        if let Some(item) = queue.get(&key) {
                            statuses.push(JobStatus::from_job(&item.job));
                            demand.push(item.job.scheduler_group.clone());
                        }
                        if !all {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "retry skipped job");
                    }
                }
            }
            (statuses, demand)
        };
        for group in demand {
            self.scheduler.increment_group_count(&group);
        }
        let kicked = statuses.len();
        for status in &statuses {
            self.status_caster.publish(status);
        }
        kicked
    }

    /// Remove every matching dead or waiting job in the RepGroup. A job
    /// with dependents is skipped: removing it would release its waiters
    /// as if it had completed. Removed jobs are deleted from the live
    /// database, and Delay/Ready removals give their demand back to the
    /// scheduler. Returns how many were removed.
    pub async fn remove_jobs(
        &self,
        rep_group: &str,
        exitcode: i32,
        fail_reason: &str,
        all: bool,
    ) -> usize {
        let removed = {
            let mut queue = self.queue.write().await;
            let keys = queue.rep_group_keys(rep_group);
            let mut removed: Vec<(String, JobState, String)> = Vec::new();
            for key in keys {
                let Some(item) = queue.get(&key) else { continue };
                let state = item.state();
                if !matches!(
                    state,
                    JobState::Buried | JobState::Delay | JobState::Dependent | JobState::Ready
                ) {
                    continue;
                }
                if item.job.exitcode != exitcode || item.job.fail_reason != fail_reason {
                    continue;
                }
                match queue.has_dependents(&key) {
                    Ok(false) => {}
                    Ok(true) | Err(_) => continue,
                }
                match queue.remove(&key) {
                    Ok(job) => {
                        removed.push((key, state, job.scheduler_group));
                        if !all {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "remove skipped job");
                    }
                }
            }
            let keys: Vec<String> = removed.iter().map(|(key, _, _)| key.clone()).collect();
            queue.forget_rep_group_keys(rep_group, &keys);
            removed
        };

        for (key, state, group) in &removed {
            if let Err(e) = self.db.delete_live_job(key) {
                tracing::warn!(key = %key, error = %e, "failed to delete live job record");
            }
            if matches!(state, JobState::Delay | JobState::Ready) {
                self.scheduler.decrement_group_count(group);
            }
        }
        removed.len()
    }

    /// Ask the scheduler to terminate every job in the RepGroup.
    /// Best-effort: failures are logged and the batch continues. Returns
    /// how many termination requests went through.
    pub async fn kill_jobs(&self, rep_group: &str) -> usize {
        let keys = self.queue.read().await.rep_group_keys(rep_group);
        let mut requested = 0;
        for key in keys {
            match self.scheduler.kill_job(&key) {
                Ok(()) => requested += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "kill request failed");
                }
            }
        }
        requested
    }

    // --- bad servers and scheduler issues -----------------------------------

    /// Record a server as unreachable and tell every status page about it.
    pub async fn report_bad_server(&self, server: Arc<CloudServer>, problem: &str) {
        server.mark_bad();
        let info = BadServer {
            id: server.id.clone(),
            name: server.name.clone(),
            ip: server.ip.clone(),
            date: Utc::now().timestamp(),
            is_bad: true,
            problem: problem.to_string(),
        };
        self.bad_servers.lock().await.insert(
            server.id.clone(),
            BadServerEntry {
                server,
                info: info.clone(),
            },
        );
        self.bad_server_caster.publish(&info);
    }

    /// A user confirmed the server is dead: forget it and destroy it. The
    /// registry entry goes first so a second confirmation finds nothing,
    /// and the handle itself destroys at most once.
    pub async fn confirm_bad_server(&self, server_id: &str) {
        let entry = { self.bad_servers.lock().await.remove(server_id) };
        if let Some(entry) = entry {
            if entry.server.is_bad() && entry.server.destroy() {
                tracing::info!(server = server_id, "destroyed bad server");
            }
        }
    }

    /// Record a provisioning problem, optionally naming where it happened
    /// (a cluster, cloud region or host). Repeats of the same message bump
    /// its count and timestamp rather than piling up new entries.
    pub async fn report_scheduler_issue(&self, msg: &str, problem_site: Option<&str>) {
        let now = Utc::now().timestamp();
        let issue = {
            let mut issues = self.sched_issues.lock().await;
            let issue = issues
                .entry(msg.to_string())
                .or_insert_with(|| SchedulerIssue {
                    msg: msg.to_string(),
                    problem_site: None,
                    first_problem: now,
                    last_problem: now,
                    count: 0,
                });
            issue.last_problem = now;
            issue.count += 1;
            if let Some(site) = problem_site {
                issue.problem_site = Some(site.to_string());
            }
            issue.clone()
        };
        self.sched_issue_caster.publish(&issue);
    }

    /// Dismiss a scheduler issue. Dismissing an unknown message is a
    /// no-op.
    pub async fn dismiss_message(&self, msg: &str) {
        self.sched_issues.lock().await.remove(msg);
    }

    pub async fn scheduler_issues(&self) -> Vec<SchedulerIssue> {
        let mut issues: Vec<SchedulerIssue> =
            self.sched_issues.lock().await.values().cloned().collect();
        issues.sort_by(|a, b| a.msg.cmp(&b.msg));
        issues
    }

    pub async fn bad_servers(&self) -> Vec<BadServer> {
        let mut servers: Vec<BadServer> = self
            .bad_servers
            .lock()
            .await
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// Push every known bad server and scheduler issue to all subscribers,
    /// as done when a status page first syncs.
    pub async fn rebroadcast_registries(&self) {
        for info in self.bad_servers().await {
            self.bad_server_caster.publish(&info);
        }
        for issue in self.scheduler_issues().await {
            self.sched_issue_caster.publish(&issue);
        }
    }

    // --- queries ------------------------------------------------------------

    /// Detailed status of a single job, if it exists.
    pub async fn job_detail(&self, key: &str) -> Option<JobStatus> {
        let (jobs, _missing) = self
            .queue
            .read()
            .await
            .jobs_by_keys(&[key.to_string()]);
        if jobs.len() == 1 {
            Some(JobStatus::from_job(&jobs[0]))
        } else {
            None
        }
    }

    pub async fn jobs_current(&self) -> Vec<Job> {
        self.queue.read().await.jobs_current()
    }

    pub async fn complete_jobs_by_rep_group(&self, rep_group: &str) -> Vec<Job> {
        self.queue.read().await.complete_jobs_by_rep_group(rep_group)
    }

    pub async fn jobs_by_rep_group(
        &self,
        rep_group: &str,
        limit: usize,
        state: Option<JobState>,
    ) -> Vec<Job> {
        self.queue
            .read()
            .await
            .jobs_by_rep_group(rep_group, limit, state)
    }

    pub async fn jobs_by_keys(&self, keys: &[String]) -> (Vec<Job>, Vec<String>) {
        self.queue.read().await.jobs_by_keys(keys)
    }
}

/// Cancel the shutdown token when the process receives SIGTERM or SIGINT.
/// A signal stream that cannot be installed is logged and ignored; the
/// embedding caller can still cancel the token itself.
fn cancel_on_signals(shutdown: CancellationToken) {
    fn named_signal(kind: SignalKind, name: &'static str) -> impl std::future::Future<Output = &'static str> {
        async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    name
                }
                Err(e) => {
                    tracing::error!(signal = name, error = %e, "failed to install signal handler");
                    std::future::pending().await
                }
            }
        }
    }

    tokio::spawn(async move {
        let received = tokio::select! {
            name = named_signal(SignalKind::terminate(), "SIGTERM") => name,
            name = named_signal(SignalKind::interrupt(), "SIGINT") => name,
        };
        tracing::info!(
            signal = received,
            "stopping the status interface, deadline sweep and sessions"
        );
        shutdown.cancel();
    });
}
