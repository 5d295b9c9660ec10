//! smsgw-worker - one SMPP connection draining its routing keys

use clap::Parser;
use smsgw_core::{worker, WorkerError};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "smsgw-worker")]
#[command(author, version, about = "SMPP worker for one connection")]
struct Args {
    /// Connection id within the group
    #[arg(long)]
    cid: String,

    /// Connection group name
    #[arg(long)]
    group: String,

    /// Path to config file
    #[arg(short, long, value_name = "FILE", env = "SMSGW_CONFIG")]
    config: Option<PathBuf>,

    /// Serve /metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,
}

async fn run(args: Args) -> Result<(), WorkerError> {
    let config = smsgw_server::load(args.config.as_deref())
        .map_err(|e| WorkerError::Config(format!("{:#}", e)))?;
    let (ctx, _pool) = smsgw_server::connect(config.clone())
        .await
        .map_err(|e| WorkerError::Store(format!("{:#}", e)))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        smsgw_server::shutdown_signal().await;
        let _ = stop_tx.send(true);
    });
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|s| *s).await;
    };

    if let Some(port) = args.metrics_port {
        let metrics = ctx.metrics.clone();
        let shutdown = stopped(stop_rx.clone());
        tokio::spawn(async move {
            if let Err(e) = smsgw_server::serve_metrics(port, metrics, shutdown).await {
                warn!("Metrics endpoint failed: {:#}", e);
            }
        });
    }

    info!(conn = %args.cid, group = %args.group, "Starting worker");
    worker::run(
        &config,
        &args.group,
        &args.cid,
        ctx.messages.clone(),
        ctx.broker.clone(),
        Some(ctx.metrics.clone()),
        stopped(stop_rx),
    )
    .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => {
            info!("Worker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Worker exiting: {}", e);
            eprintln!("smsgw-worker: {}", e);
            ExitCode::from(WorkerError::EXIT_NO_RESTART as u8)
        }
    }
}
