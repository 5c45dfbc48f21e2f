use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use rtcollect::agent::Agent;
use rtcollect::config::Config;

/// Streaming network-telemetry collector for router fleets.
#[derive(Parser)]
#[command(name = "rtcollect", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("GIT_COMMIT").unwrap_or("unknown"),
        "rtcollect starting",
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let mut agent = Agent::new(cfg)?;
    agent.start().await?;

    // Collect until the first termination signal, then unwind.
    let signal = wait_for_shutdown().await;
    tracing::info!(signal, "shutting down");

    agent.stop().await;

    Ok(())
}

/// Block until SIGINT or SIGTERM, whichever lands first. When the SIGTERM
/// handler cannot be installed, ctrl-c alone still stops the collector.
async fn wait_for_shutdown() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}
