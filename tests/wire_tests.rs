//! Wire-format tests: the status page speaks JSON with capitalized field
//! names and lowercase state values, so the serde renames are load-bearing.

use serde_json::{json, Value};

use workq::queue::{Job, JobState};
use workq::status::message::{BadServer, SchedulerIssue, StateCountDelta, StatusRequest};
use workq::status::view::JobStatus;

#[test]
fn test_request_decodes_page_json() {
    let req: StatusRequest = serde_json::from_value(json!({
        "Request": "retry",
        "RepGroup": "rg1",
        "Exitcode": 2,
        "FailReason": "oom",
        "All": true,
    }))
    .unwrap();
    assert_eq!(req.request, "retry");
    assert_eq!(req.rep_group, "rg1");
    assert_eq!(req.exitcode, 2);
    assert_eq!(req.fail_reason, "oom");
    assert!(req.all);
    assert!(req.key.is_empty());
    assert!(req.state.is_none());

    let req: StatusRequest = serde_json::from_value(json!({
        "Key": "abc123",
    }))
    .unwrap();
    assert_eq!(req.key, "abc123");

    let req: StatusRequest = serde_json::from_value(json!({
        "Request": "details",
        "RepGroup": "rg1",
        "State": "buried",
    }))
    .unwrap();
    assert_eq!(req.state, Some(JobState::Buried));
}

#[test]
fn test_job_states_are_lowercase_on_the_wire() {
    for (state, wire) in [
        (JobState::New, "\"new\""),
        (JobState::Delay, "\"delay\""),
        (JobState::Ready, "\"ready\""),
        (JobState::Reserved, "\"reserved\""),
        (JobState::Running, "\"running\""),
        (JobState::Lost, "\"lost\""),
        (JobState::Buried, "\"buried\""),
        (JobState::Complete, "\"complete\""),
        (JobState::Dependent, "\"dependent\""),
    ] {
        assert_eq!(serde_json::to_string(&state).unwrap(), wire);
        assert_eq!(state.to_string(), wire.trim_matches('"'));
    }
}

#[test]
fn test_state_count_delta_field_names() {
    let delta = StateCountDelta {
        rep_group: "rg1".to_string(),
        from_state: JobState::New,
        to_state: JobState::Ready,
        count: 2,
    };
    let value = serde_json::to_value(&delta).unwrap();
    assert_eq!(
        value,
        json!({"RepGroup": "rg1", "FromState": "new", "ToState": "ready", "Count": 2})
    );
}

#[test]
fn test_job_status_field_names() {
    let mut job = Job::new("echo hello", "/data/run", "rg1");
    job.state = JobState::Ready;
    job.requirements.ram_mb = 1024;
    job.requirements.time_secs = 3600.0;
    job.requirements.disk_gb = 10;
    job.requirements.cores = 2;
    job.actual_cwd = "/data/run/jobs/abc".to_string();

    let value = serde_json::to_value(JobStatus::from_job(&job)).unwrap();
    let object = value.as_object().unwrap();
    for field in [
        "Key",
        "RepGroup",
        "DepGroups",
        "Dependencies",
        "Cmd",
        "State",
        "Cwd",
        "CwdBase",
        "HomeChanged",
        "Behaviours",
        "Mounts",
        "ExpectedRAM",
        "ExpectedTime",
        "RequestedDisk",
        "Cores",
        "PeakRAM",
        "Exited",
        "Exitcode",
        "FailReason",
        "Pid",
        "Host",
        "HostID",
        "HostIP",
        "Walltime",
        "CPUtime",
        "Started",
        "Ended",
        "StdErr",
        "StdOut",
        "Attempts",
        "Similar",
    ] {
        assert!(object.contains_key(field), "missing field {field}");
    }
    assert_eq!(value["ExpectedRAM"], 1024);
    assert_eq!(value["CwdBase"], "/data/run");
    assert_eq!(value["Cwd"], "/jobs/abc");
    assert_eq!(value["State"], "ready");
    // times before the job ran are zero epochs
    assert_eq!(value["Started"], 0);
    assert_eq!(value["Ended"], 0);
}

#[test]
fn test_bad_server_and_issue_field_names() {
    let server = BadServer {
        id: "srv-1".to_string(),
        name: "worker-1".to_string(),
        ip: "10.0.0.9".to_string(),
        date: 1700000000,
        is_bad: true,
        problem: "no route to host".to_string(),
    };
    let value = serde_json::to_value(&server).unwrap();
    assert_eq!(value["ID"], "srv-1");
    assert_eq!(value["IP"], "10.0.0.9");
    assert_eq!(value["IsBad"], true);

    let issue = SchedulerIssue {
        msg: "quota exceeded".to_string(),
        problem_site: Some("openstack".to_string()),
        first_problem: 1700000000,
        last_problem: 1700000060,
        count: 3,
    };
    let value = serde_json::to_value(&issue).unwrap();
    assert_eq!(value["Msg"], "quota exceeded");
    assert_eq!(value["ProblemSite"], "openstack");
    assert_eq!(value["FirstProblem"], 1700000000);
    assert_eq!(value["LastProblem"], 1700000060);
    assert_eq!(value["Count"], 3);

    let round_trip: Value = serde_json::to_value(
        serde_json::from_value::<SchedulerIssue>(value.clone()).unwrap(),
    )
    .unwrap();
    assert_eq!(round_trip, value);

    // an issue with no known site leaves the field off the wire entirely
    let unsited = SchedulerIssue {
        problem_site: None,
        ..issue
    };
    let value = serde_json::to_value(&unsited).unwrap();
    assert!(value.as_object().unwrap().get("ProblemSite").is_none());
    let round_trip = serde_json::from_value::<SchedulerIssue>(value).unwrap();
    assert!(round_trip.problem_site.is_none());
}
