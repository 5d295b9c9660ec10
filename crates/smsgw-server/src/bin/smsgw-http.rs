//! smsgw-http - HTTP ingress

use anyhow::Result;
use clap::{Parser, Subcommand};
use smsgw_api::{create_router, hash_password, AppState};
use smsgw_common::types::Permission;
use smsgw_storage::NewUser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "smsgw-http")]
#[command(author, version, about = "HTTP ingress for SMS dispatch")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", env = "SMSGW_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port, overrides [http].port
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user
    Adduser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
        /// Connection group the user's messages are routed through
        #[arg(long)]
        group: String,
        /// Comma separated, e.g. "Send message,List messages"
        #[arg(long, default_value = "")]
        permissions: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = smsgw_server::load(args.config.as_deref())?;
    let (ctx, pool) = smsgw_server::connect(config.clone()).await?;

    if let Some(Command::Adduser {
        username,
        password,
        name,
        email,
        group,
        permissions,
    }) = args.command
    {
        config.group(&group)?;
        let user = ctx
            .users
            .create(NewUser {
                username,
                password: hash_password(&password)?,
                name,
                email,
                connection_group: group,
                permissions: Permission::parse_list(&permissions)?,
            })
            .await?;
        info!(username = %user.username, group = %user.connection_group, "User created");
        return Ok(());
    }

    let port = args.port.unwrap_or(config.http.port);
    let app = create_router(AppState::new(ctx, Some(pool)));
    let listener = tokio::net::TcpListener::bind((config.http.bind_address.as_str(), port)).await?;
    info!(address = %config.http.bind_address, port, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(smsgw_server::shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
