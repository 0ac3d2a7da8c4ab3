use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    New,
    Delay,
    Ready,
    Reserved,
    Running,
    Lost,
    Buried,
    Complete,
    Dependent,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::New => write!(f, "new"),
            JobState::Delay => write!(f, "delay"),
            JobState::Ready => write!(f, "ready"),
            JobState::Reserved => write!(f, "reserved"),
            JobState::Running => write!(f, "running"),
            JobState::Lost => write!(f, "lost"),
            JobState::Buried => write!(f, "buried"),
            JobState::Complete => write!(f, "complete"),
            JobState::Dependent => write!(f, "dependent"),
        }
    }
}

/// Resources a job asks its scheduler group for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Megabytes.
    pub ram_mb: u64,
    /// Seconds.
    pub time_secs: f64,
    /// Gigabytes.
    pub disk_gb: u64,
    pub cores: u32,
}

/// A unit of work. Identity is the key, derived from the command line and
/// working directory, so resubmitting the same command is the same job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub key: String,
    /// Reporting group. Mutable: a resubmission may file the job under a
    /// new group.
    pub rep_group: String,
    pub cmd: String,
    pub cwd: String,
    /// The directory the job actually ran in, when a unique working dir was
    /// created under `cwd`.
    pub actual_cwd: String,
    pub change_home: bool,
    pub state: JobState,
    /// Keys of jobs that must complete before this one may run.
    pub dependencies: Vec<String>,
    pub dep_groups: Vec<String>,
    pub requirements: Requirements,
    pub priority: u8,
    pub behaviours: String,
    pub mounts: String,
    pub exited: bool,
    pub exitcode: i32,
    pub fail_reason: String,
    pub peak_ram_mb: u64,
    pub pid: u32,
    pub host: String,
    pub host_id: String,
    pub host_ip: String,
    pub wall_time_secs: f64,
    pub cpu_time_secs: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub stderr: String,
    pub stdout: String,
    pub attempts: u32,
    pub retries: u32,
    /// Failures left before the job is buried instead of re-queued.
    pub until_buried: u32,
    /// Resource-derived bucket used to request capacity from a backend.
    pub scheduler_group: String,
    /// The runner's heartbeat lapsed while the job was running.
    pub lost: bool,
    /// How many other jobs shared this one's (state, exitcode, fail reason)
    /// when it was picked as a representative sample.
    pub similar: u32,
}

impl Job {
    pub fn new(cmd: impl Into<String>, cwd: impl Into<String>, rep_group: impl Into<String>) -> Self {
        let cmd = cmd.into();
        let cwd = cwd.into();
        Self {
            key: job_key(&cmd, &cwd),
            rep_group: rep_group.into(),
            cmd,
            cwd,
            actual_cwd: String::new(),
            change_home: false,
            state: JobState::New,
            dependencies: Vec::new(),
            dep_groups: Vec::new(),
            requirements: Requirements::default(),
            priority: 0,
            behaviours: String::new(),
            mounts: String::new(),
            exited: false,
            exitcode: 0,
            fail_reason: String::new(),
            peak_ram_mb: 0,
            pid: 0,
            host: String::new(),
            host_id: String::new(),
            host_ip: String::new(),
            wall_time_secs: 0.0,
            cpu_time_secs: 0.0,
            start_time: None,
            end_time: None,
            stderr: String::new(),
            stdout: String::new(),
            attempts: 0,
            retries: 3,
            until_buried: 4,
            scheduler_group: String::new(),
            lost: false,
            similar: 0,
        }
    }
}

/// Stable job identity: hex digest over the command and working directory.
pub fn job_key(cmd: &str, cwd: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cmd.as_bytes());
    hasher.update([0]);
    hasher.update(cwd.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
