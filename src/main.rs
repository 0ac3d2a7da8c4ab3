use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use workq::backends::{LocalScheduler, MemorySink};
use workq::config::ManagerConfig;
use workq::manager::Manager;

#[derive(Parser, Debug)]
#[command(name = "workq")]
#[command(about = "A workflow job-queue manager with a live status interface")]
struct Args {
    /// Port for the status web interface
    #[arg(long, default_value = "11302")]
    port: u16,

    /// Address to bind the status interface to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Events buffered per status subscriber before it counts as lagging
    #[arg(long, default_value = "64")]
    subscriber_buffer: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let mut config = ManagerConfig::new(listen_addr);
    config.subscriber_buffer = args.subscriber_buffer;

    tracing::info!(addr = %listen_addr, "starting workq manager");

    let manager = Arc::new(Manager::new(
        config,
        Arc::new(MemorySink::new()),
        Arc::new(LocalScheduler::new()),
    ));

    // run() wires SIGTERM/SIGINT to this token
    let shutdown = CancellationToken::new();
    manager.run(shutdown).await?;

    Ok(())
}
