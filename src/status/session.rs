//! One websocket session per connected status page: a read loop that
//! serves client requests, plus three push loops forwarding the status,
//! bad-server and scheduler-issue broadcasts. The transport is
//! single-writer, so every outbound message goes through one session-wide
//! write guard; the loops otherwise run in parallel.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::broadcast::Subscriber;
use crate::manager::Manager;
use crate::queue::Job;
use crate::status::message::{StateCountDelta, StatusRequest};
use crate::status::view::{group_state_counts, JobStatus};

/// RepGroup label of the all-groups summary counts.
const ALL_GROUPS: &str = "+all+";

type SharedWriter = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Upgrade an HTTP request to a websocket and run the session until the
/// client goes away.
pub async fn status_ws(
    ws: WebSocketUpgrade,
    State(manager): State<Arc<Manager>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, manager))
}

async fn handle_session(socket: WebSocket, manager: Arc<Manager>) {
    let session = uuid::Uuid::new_v4();
    debug!(%session, "status client connected");

    let (sink, stream) = socket.split();
    let writer: SharedWriter = Arc::new(Mutex::new(sink));

    let mut loops = tokio::task::JoinSet::new();
    loops.spawn(push_loop(
        "status",
        manager.status_caster().join(),
        writer.clone(),
    ));
    loops.spawn(push_loop(
        "badservers",
        manager.bad_server_caster().join(),
        writer.clone(),
    ));
    loops.spawn(push_loop(
        "schedulerissues",
        manager.sched_issue_caster().join(),
        writer.clone(),
    ));
    loops.spawn(read_loop(stream, writer, manager));

    // The first loop to exit, for any reason, tears the session down; the
    // rest are cancelled and their subscriptions dropped.
    if let Some(Err(e)) = loops.join_next().await {
        warn!(%session, error = %e, "status session loop failed");
    }
    loops.shutdown().await;

    debug!(%session, "status client disconnected");
}

/// Forward one broadcast stream to the client until the subscription or
/// the transport ends.
async fn push_loop<T: Serialize + Send + 'static>(
    stream: &'static str,
    mut subscriber: Subscriber<T>,
    writer: SharedWriter,
) {
    while let Some(event) = subscriber.recv().await {
        if write_json(&writer, &event).await.is_err() {
            debug!(stream, "status client write failed");
            return;
        }
    }
    if subscriber.lagged() {
        warn!(stream, "status client too slow, dropping session");
    }
}

/// Serve client requests until the transport breaks or sends something
/// undecodable.
async fn read_loop(mut stream: SplitStream<WebSocket>, writer: SharedWriter, manager: Arc<Manager>) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "status client read failed");
                return;
            }
        };
        let req: StatusRequest = match msg {
            Message::Text(text) => match serde_json::from_str(text.as_str()) {
                Ok(req) => req,
                Err(e) => {
                    // probably the browser was refreshed, breaking the conn
                    debug!(error = %e, "undecodable status request");
                    return;
                }
            },
            Message::Close(_) => return,
            _ => continue,
        };

        for reply in dispatch(&manager, req).await {
            if write_json(&writer, &reply).await.is_err() {
                return;
            }
        }
    }
}

/// A message produced directly in reply to a client request. Serialized
/// flat, so the client sees the same shapes the broadcasters push.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Status(JobStatus),
    StateCount(StateCountDelta),
}

/// Translate a client request into queue operations, returning the
/// messages to write straight back. Mutating requests reply through the
/// broadcasters instead.
pub async fn dispatch(manager: &Manager, req: StatusRequest) -> Vec<Reply> {
    if !req.key.is_empty() {
        return manager
            .job_detail(&req.key)
            .await
            .into_iter()
            .map(Reply::Status)
            .collect();
    }

    match req.request.as_str() {
        "current" => current(manager).await,
        "details" => details(manager, &req).await,
        "retry" => {
            manager
                .retry_jobs(&req.rep_group, req.exitcode, &req.fail_reason, req.all)
                .await;
            Vec::new()
        }
        "remove" => {
            manager
                .remove_jobs(&req.rep_group, req.exitcode, &req.fail_reason, req.all)
                .await;
            Vec::new()
        }
        "kill" => {
            manager.kill_jobs(&req.rep_group).await;
            Vec::new()
        }
        "confirmBadServer" => {
            if !req.server_id.is_empty() {
                manager.confirm_bad_server(&req.server_id).await;
            }
            Vec::new()
        }
        "dismissMsg" => {
            if !req.msg.is_empty() {
                manager.dismiss_message(&req.msg).await;
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// The initial sync: summary counts across every group, then counts per
/// RepGroup with that group's completed jobs folded in, then a rebroadcast
/// of known bad servers and scheduler issues.
async fn current(manager: &Manager) -> Vec<Reply> {
    let mut by_group: BTreeMap<String, Vec<Job>> = BTreeMap::new();
    for job in manager.jobs_current().await {
        by_group.entry(job.rep_group.clone()).or_default().push(job);
    }
    for (rep_group, jobs) in by_group.iter_mut() {
        jobs.extend(manager.complete_jobs_by_rep_group(rep_group).await);
    }

    let all: Vec<Job> = by_group.values().flatten().cloned().collect();
    let mut replies: Vec<Reply> = group_state_counts(ALL_GROUPS, &all)
        .into_iter()
        .map(Reply::StateCount)
        .collect();
    for (rep_group, jobs) in &by_group {
        replies.extend(
            group_state_counts(rep_group, jobs)
                .into_iter()
                .map(Reply::StateCount),
        );
    }

    manager.rebroadcast_registries().await;
    replies
}

/// Example job details for a RepGroup: one job per distinct (state,
/// exitcode, fail reason), reported under the group the client asked for
/// rather than the job's most recent group.
async fn details(manager: &Manager, req: &StatusRequest) -> Vec<Reply> {
    manager
        .jobs_by_rep_group(&req.rep_group, 1, req.state)
        .await
        .iter()
        .map(|job| {
            let mut status = JobStatus::from_job(job);
            status.rep_group = req.rep_group.clone();
            Reply::Status(status)
        })
        .collect()
}

/// Write one JSON message under the session write guard. A value that
/// fails to serialize is logged and skipped; only transport failures are
/// returned.
async fn write_json<T: Serialize>(writer: &SharedWriter, value: &T) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize status message");
            return Ok(());
        }
    };
    writer.lock().await.send(Message::Text(json.into())).await
}
