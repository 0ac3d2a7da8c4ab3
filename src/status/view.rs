//! Display projections of queue state for the status page.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::queue::{Job, JobState};
use crate::status::message::StateCountDelta;

/// The job info we send to the status webpage. Only real difference to
/// [`Job`] is that values are converted to easy-to-display forms: RAM in
/// MB, time in seconds, disk in GB, timestamps as epoch seconds, and the
/// working directory split into its base and the leaf the job actually ran
/// in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobStatus {
    pub key: String,
    pub rep_group: String,
    pub dep_groups: Vec<String>,
    pub dependencies: Vec<String>,
    pub cmd: String,
    pub state: JobState,
    pub cwd: String,
    pub cwd_base: String,
    pub home_changed: bool,
    pub behaviours: String,
    pub mounts: String,
    #[serde(rename = "ExpectedRAM")]
    pub expected_ram: u64,
    pub expected_time: f64,
    pub requested_disk: u64,
    pub cores: u32,
    #[serde(rename = "PeakRAM")]
    pub peak_ram: u64,
    pub exited: bool,
    pub exitcode: i32,
    pub fail_reason: String,
    pub pid: u32,
    pub host: String,
    #[serde(rename = "HostID")]
    pub host_id: String,
    #[serde(rename = "HostIP")]
    pub host_ip: String,
    #[serde(rename = "Walltime")]
    pub walltime: f64,
    #[serde(rename = "CPUtime")]
    pub cpu_time: f64,
    pub started: i64,
    pub ended: i64,
    pub std_err: String,
    pub std_out: String,
    pub attempts: u32,
    pub similar: u32,
}

impl JobStatus {
    /// Build the display projection of a job. A running job whose
    /// heartbeat lapsed is shown as lost, and a still-running job's
    /// walltime is computed live.
    pub fn from_job(job: &Job) -> Self {
        let running = job.state == JobState::Running;
        let state = if running && job.lost {
            JobState::Lost
        } else {
            job.state
        };

        let cwd = if job.actual_cwd.is_empty() {
            String::new()
        } else {
            let leaf = job
                .actual_cwd
                .strip_prefix(&job.cwd)
                .unwrap_or(&job.actual_cwd);
            format!("/{}", leaf.trim_start_matches('/'))
        };

        let walltime = match (running, job.start_time) {
            (true, Some(started)) => (Utc::now() - started).num_milliseconds() as f64 / 1000.0,
            _ => job.wall_time_secs,
        };

        Self {
            key: job.key.clone(),
            rep_group: job.rep_group.clone(),
            dep_groups: job.dep_groups.clone(),
            dependencies: job.dependencies.clone(),
            cmd: job.cmd.clone(),
            state,
            cwd,
            cwd_base: job.cwd.clone(),
            home_changed: job.change_home,
            behaviours: job.behaviours.clone(),
            mounts: job.mounts.clone(),
            expected_ram: job.requirements.ram_mb,
            expected_time: job.requirements.time_secs,
            requested_disk: job.requirements.disk_gb,
            cores: job.requirements.cores,
            peak_ram: job.peak_ram_mb,
            exited: job.exited,
            exitcode: job.exitcode,
            fail_reason: job.fail_reason.clone(),
            pid: job.pid,
            host: job.host.clone(),
            host_id: job.host_id.clone(),
            host_ip: job.host_ip.clone(),
            walltime,
            cpu_time: job.cpu_time_secs,
            started: job.start_time.map(|t| t.timestamp()).unwrap_or(0),
            ended: job.end_time.map(|t| t.timestamp()).unwrap_or(0),
            std_err: job.stderr.clone(),
            std_out: job.stdout.clone(),
            attempts: job.attempts,
            similar: job.similar,
        }
    }
}

/// Count jobs per state. For display simplicity, Reserved is merged into
/// Running; a lost job still sits under Running here.
pub fn state_counts(jobs: &[Job]) -> HashMap<JobState, usize> {
    let mut counts = HashMap::new();
    for job in jobs {
        let state = match job.state {
            JobState::Reserved | JobState::Running => JobState::Running,
            state => state,
        };
        *counts.entry(state).or_insert(0) += 1;
    }
    counts
}

/// The snapshot count messages for one RepGroup, ordered by state name so
/// output is stable.
pub fn group_state_counts(rep_group: &str, jobs: &[Job]) -> Vec<StateCountDelta> {
    let mut deltas: Vec<StateCountDelta> = state_counts(jobs)
        .into_iter()
        .map(|(to_state, count)| StateCountDelta {
            rep_group: rep_group.to_string(),
            from_state: JobState::New,
            to_state,
            count,
        })
        .collect();
    deltas.sort_by_key(|delta| delta.to_state.to_string());
    deltas
}
