//! launch-racer binary
//!
//! Loads `.env`, validates configuration, wires the websocket stream, RPC
//! client and template constructor into the orchestrator and runs one race.
//! Exit code 0 on completion, 1 on failure or invalid configuration.

use anyhow::{Context, Result};
use clap::Parser;
use launch_racer::config::Config;
use launch_racer::metrics::metrics;
use launch_racer::race_engine::Orchestrator;
use launch_racer::rpc::SolanaRpc;
use launch_racer::streaming::websocket_stream::WebSocketStream;
use launch_racer::tx_builder::TemplateConstructor;
use launch_racer::wallet::WalletManager;
use launch_racer::{ExecutionResult, RaceConfig, RaceError};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env must be loaded before clap reads env fallbacks
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.log_json) {
        eprintln!("failed to initialise logging: {:#}", e);
        return ExitCode::from(1);
    }
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "Starting launch racer");

    let code = match run(&args.config).await {
        Ok(result) => {
            match serde_json::to_string(&result) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!(error = %e, "Could not serialise execution result"),
            }
            0
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Run failed");
            e.downcast_ref::<RaceError>()
                .map(RaceError::exit_code)
                .unwrap_or(1)
        }
    };

    info!(metrics = %metrics().gather_text(), "Final metrics");
    ExitCode::from(code)
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        "launch_racer=debug,info"
    } else {
        "launch_racer=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

async fn run(config: &Config) -> Result<ExecutionResult> {
    let race: RaceConfig = config.validate()?;

    let wallet = WalletManager::from_file(&race.keypair_path)
        .map_err(|e| RaceError::Configuration(format!("{:#}", e)))?;
    info!(wallet = %wallet.pubkey(), "Wallet loaded");

    let constructor = TemplateConstructor::from_file(&race.payload_templates)
        .map_err(|e| RaceError::Configuration(e.to_string()))?;

    let source = WebSocketStream::new(race.ws_url.clone())
        .with_access_token(race.stream_token.clone())
        .with_commitment(race.commitment);
    let rpc = SolanaRpc::new(race.rpc_url.clone(), race.commitment);
    info!(rpc = %rpc.url(), ws = %race.ws_url, "Endpoints configured");

    let orchestrator = Arc::new(Orchestrator::new(
        race,
        wallet.keypair_arc(),
        Arc::new(source),
        Arc::new(rpc),
        Arc::new(constructor),
    ));

    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            shutdown.shutdown();
        }
    });

    Arc::clone(&orchestrator)
        .run()
        .await
        .context("race did not complete")
}
