/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Running maker-farming tasks with graceful shutdown and final counters
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use maker_farm::{FarmConfig, TaskManager};

#[derive(Parser, Debug)]
#[command(name = "maker-farm", version, about = "Maker-points farming agent")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    /// Default filter when RUST_LOG is not set.
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Validate the configuration and exit without trading.
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    let started_at = Instant::now();
    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting maker-farm"
    );

    let config = load_config(&args.config_path)?;
    info!(symbols = ?config.symbols, "configuration loaded");

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let mut task_manager = TaskManager::new(&config.endpoints.ws_url);

    let shutdown = task_manager.shutdown_token();
    spawn_signal_listener(shutdown.clone());

    info!("spawning tasks");
    task_manager
        .spawn_from_config(&config)
        .await
        .context("spawn tasks from config")?;
    info!("tasks started");

    shutdown.cancelled().await;

    let reports = task_manager
        .shutdown_and_wait()
        .await
        .context("shutdown tasks")?;

    for report in &reports {
        info!(
            symbol = %report.symbol,
            placed = report.stats.placed,
            cancelled = report.stats.cancelled,
            rebalances = report.stats.rebalances,
            fills = report.stats.fills,
            liquidations = report.stats.liquidations,
            "final quote accounting"
        );
    }
    info!(
        elapsed_secs = started_at.elapsed().as_secs(),
        "shutdown complete"
    );

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    // RUST_LOG wins over the CLI flag so per-module filters keep working.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("initialize tracing subscriber: {err}"))?;
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<FarmConfig> {
    let path_str = path.to_str().context("config path must be valid utf-8")?;
    FarmConfig::from_file(path_str).context("load config")
}

/// One listener covers both signals; either one drains the quote ladders.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let interrupt = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        res = interrupt => {
                            if let Err(err) = res {
                                warn!(error = %err, "interrupt handler unavailable");
                                return;
                            }
                            info!("interrupt received; draining quotes");
                        }
                        _ = terminate.recv() => {
                            info!("terminate received; draining quotes");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "terminate handler unavailable; interrupt only");
                    if interrupt.await.is_err() {
                        return;
                    }
                    info!("interrupt received; draining quotes");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if interrupt.await.is_err() {
                return;
            }
            info!("interrupt received; draining quotes");
        }

        shutdown.cancel();
    });
}
