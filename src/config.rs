use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub listen_addr: SocketAddr,
    /// Events buffered per status subscriber before it counts as lagging.
    pub subscriber_buffer: usize,
    /// How often delay and heartbeat deadlines are swept.
    pub deadline_interval: Duration,
    /// Back-off before a released job is re-queued.
    pub requeue_delay: Duration,
    /// How long a running job may go untouched before it shows as lost.
    pub touch_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:11302".parse().unwrap(),
            subscriber_buffer: 64,
            deadline_interval: Duration::from_secs(1),
            requeue_delay: Duration::from_secs(30),
            touch_grace: Duration::from_secs(60),
        }
    }
}

impl ManagerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }
}
