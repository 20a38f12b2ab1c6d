//! lobby-swarm: join a batch of bots to a Gartic Phone session.
//!
//! ```text
//! lobby-swarm <LINK> <COUNT> [--config swarm.toml] [--username Bot]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use lobby_swarm::{SessionCode, Swarm, SwarmConfig};

/// How long units get to close their connections after Ctrl+C.
const INTERRUPT_GRACE: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "lobby-swarm")]
#[command(about = "Join simulated participants to a Gartic Phone session")]
struct Cli {
    /// Share link (`https://garticphone.com/?c=CODE`) or bare session code
    link: String,

    /// Number of bots to join
    count: usize,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Display name prefix (overrides config file)
    #[arg(short, long)]
    username: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SwarmConfig::load(path)?,
        None => SwarmConfig::default(),
    };
    if let Some(username) = cli.username {
        config = config.with_username_prefix(username);
    }

    let code = SessionCode::parse(&cli.link);
    info!(
        "Starting to join {} bots to the game. This may take a moment...",
        cli.count
    );

    let swarm = Swarm::new(config);
    let shutdown = swarm.shutdown_handle();
    let run = swarm.run(&code, cli.count);
    tokio::pin!(run);

    let report = tokio::select! {
        report = &mut run => report,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down…");
            shutdown.shutdown();
            match tokio::time::timeout(INTERRUPT_GRACE, &mut run).await {
                Ok(report) => report,
                Err(_) => {
                    warn!("units did not stop in time, exiting");
                    return Ok(());
                }
            }
        }
    };

    info!(
        connected = report.succeeded(),
        failed = report.failed(),
        "all bots finished"
    );
    Ok(())
}
