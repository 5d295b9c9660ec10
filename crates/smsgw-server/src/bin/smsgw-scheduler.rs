//! smsgw-scheduler - republishes scheduled messages when their minute comes

use anyhow::Result;
use clap::Parser;
use smsgw_core::Scheduler;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Exit status for a failed sweep
const EXIT_SWEEP_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "smsgw-scheduler")]
#[command(author, version, about = "Sweeper for scheduled messages")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", env = "SMSGW_CONFIG")]
    config: Option<PathBuf>,
}

async fn run(args: Args) -> Result<()> {
    let config = smsgw_server::load(args.config.as_deref())?;
    let (ctx, _pool) = smsgw_server::connect(config.clone()).await?;

    let scheduler = Scheduler::new(config, ctx.messages.clone(), ctx.broker.clone())
        .with_metrics(ctx.metrics.clone());
    scheduler.run(smsgw_server::shutdown_signal()).await?;
    info!("Scheduler stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Scheduler exiting: {:#}", e);
            eprintln!("smsgw-scheduler: {:#}", e);
            ExitCode::from(EXIT_SWEEP_FAILED)
        }
    }
}
