//! Drives a full status session over a real socket: the router is served
//! on an ephemeral port and a websocket client sends requests and reads
//! replies the way the status page does, so the session's read loop, push
//! loops and shared write guard are all exercised through the transport.
//!
//! Jobs are seeded before the client connects: a subscriber only sees
//! events published after it joins, so the frames each test reads are
//! exactly the ones it asked for.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use workq::backends::{LocalScheduler, MemorySink};
use workq::config::ManagerConfig;
use workq::manager::Manager;
use workq::queue::{Job, JobState};
use workq::status::server::build_router;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_manager() -> Arc<Manager> {
    Arc::new(Manager::new(
        ManagerConfig::default(),
        Arc::new(MemorySink::new()),
        Arc::new(LocalScheduler::new()),
    ))
}

/// Serve the status interface on an ephemeral port and connect a client.
async fn connect_session(manager: Arc<Manager>) -> WsClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(manager);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let (client, _response) = connect_async(format!("ws://{addr}/status_ws"))
        .await
        .expect("websocket handshake");
    client
}

/// Next JSON text frame from the socket, skipping protocol frames.
async fn recv_json(client: &mut WsClient) -> Value {
    loop {
        let msg = client
            .next()
            .await
            .expect("socket still open")
            .expect("readable frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("valid JSON frame");
        }
    }
}

#[tokio::test]
async fn test_session_round_trip_over_a_real_socket() {
    let manager = test_manager();
    let mut job = Job::new("echo live", "/tmp/work", "rg-live");
    job.scheduler_group = "sg1".to_string();
    let key = job.key.clone();
    manager.add_jobs(vec![job]).await;

    let mut client = connect_session(manager.clone()).await;

    // a single-job detail request comes straight back on the same socket
    client
        .send(Message::text(json!({ "Key": key.clone() }).to_string()))
        .await
        .unwrap();
    let detail = recv_json(&mut client).await;
    assert_eq!(detail["Key"], key.as_str());
    assert_eq!(detail["State"], "ready");
    assert_eq!(detail["CwdBase"], "/tmp/work");

    // a current sync yields the +all+ summary then the per-group counts
    client
        .send(Message::text(json!({ "Request": "current" }).to_string()))
        .await
        .unwrap();
    let summary = recv_json(&mut client).await;
    assert_eq!(summary["RepGroup"], "+all+");
    assert_eq!(summary["FromState"], "new");
    assert_eq!(summary["ToState"], "ready");
    assert_eq!(summary["Count"], 1);
    let group = recv_json(&mut client).await;
    assert_eq!(group["RepGroup"], "rg-live");
    assert_eq!(group["ToState"], "ready");
    assert_eq!(group["Count"], 1);

    // the push loops forward broadcasts to the same socket; the earlier
    // replies prove the session (and so its subscriptions) is up
    manager
        .report_scheduler_issue("quota exceeded", Some("cloud-a"))
        .await;
    let issue = recv_json(&mut client).await;
    assert_eq!(issue["Msg"], "quota exceeded");
    assert_eq!(issue["ProblemSite"], "cloud-a");
    assert_eq!(issue["Count"], 1);

    client.close(None).await.unwrap();
}

#[tokio::test]
async fn test_mutations_over_the_socket_change_the_queue() {
    let manager = test_manager();
    let mut job = Job::new("echo dead", "/tmp/work", "rg-dead");
    job.scheduler_group = "sg1".to_string();
    let key = job.key.clone();
    manager.add_jobs(vec![job]).await;
    let reserved = manager.reserve_job().await.unwrap();
    assert_eq!(reserved.key, key);
    manager
        .start_job(&key, "host1", "host-id-1", "10.0.0.1", 42)
        .await
        .unwrap();
    manager.bury_job(&key, 2, "oom").await.unwrap();

    let mut client = connect_session(manager.clone()).await;
    client
        .send(Message::text(
            json!({
                "Request": "retry",
                "RepGroup": "rg-dead",
                "Exitcode": 2,
                "FailReason": "oom",
                "All": true,
            })
            .to_string(),
        ))
        .await
        .unwrap();

    // the kick replies through the status broadcast rather than directly
    let pushed = recv_json(&mut client).await;
    assert_eq!(pushed["Key"], key.as_str());
    assert_eq!(pushed["State"], "ready");

    let detail = manager.job_detail(&key).await.unwrap();
    assert_eq!(detail.state, JobState::Ready);

    client.close(None).await.unwrap();
}
