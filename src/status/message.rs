use serde::{Deserialize, Serialize};

use crate::queue::JobState;

/// What the status webpage sends us to ask for info about jobs.
///
/// The possible `Request` values are:
/// - `current`: count info for every job in every RepGroup.
/// - `details`: example job details for jobs in the RepGroup, grouped by
///   having the same state, exitcode and fail reason.
/// - `retry`: kick the buried jobs with the given RepGroup, exitcode and
///   fail reason.
/// - `remove`: remove the matching dead or waiting jobs.
/// - `kill`: kill the running jobs with the given RepGroup.
/// - `confirmBadServer`: confirm that the server with ID `ServerID` is bad.
/// - `dismissMsg`: dismiss the given `Msg`.
///
/// Sending `Key` instead means "give me detailed info about this single
/// job".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StatusRequest {
    pub key: String,
    pub rep_group: String,
    /// Limits `details` to jobs in this state.
    pub state: Option<JobState>,
    pub exitcode: i32,
    pub fail_reason: String,
    /// When false, `retry` and `remove` act on a single matching job.
    pub all: bool,
    #[serde(rename = "ServerID")]
    pub server_id: String,
    pub msg: String,
    pub request: String,
}

/// Per-RepGroup state count pushed to the status page. `FromState` of
/// `new` marks an initial snapshot count rather than a transition delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateCountDelta {
    pub rep_group: String,
    pub from_state: JobState,
    pub to_state: JobState,
    pub count: usize,
}

/// Descriptor of a cloud server that has been declared unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BadServer {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "IP")]
    pub ip: String,
    /// Epoch seconds the problem was noticed.
    pub date: i64,
    pub is_bad: bool,
    pub problem: String,
}

/// A provisioning problem reported by a scheduler backend. Repeats of the
/// same message bump the count instead of piling up new entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchedulerIssue {
    pub msg: String,
    /// Where the problem happened, when the backend can say (a cluster,
    /// cloud region or host).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_site: Option<String>,
    /// Epoch seconds of the first occurrence.
    pub first_problem: i64,
    /// Epoch seconds of the most recent occurrence.
    pub last_problem: i64,
    pub count: u32,
}
