use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sinkbridge_server::{App, SinkbridgeConfig, telemetry};

/// Sink bridge and cleanup operators of the stream service.
#[derive(Parser, Debug)]
#[command(name = "sinkbridge-server", about = "Sink bridge and cleanup operators")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "sinkbridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the cleanup operators until SIGINT or SIGTERM (default).
    Run,
    /// Validate the configuration file, then exit.
    CheckConfig,
    /// Encrypt every token still stored in plaintext, then exit.
    MigrateTokens,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = SinkbridgeConfig::load(&cli.config)?;

    if let Some(Commands::CheckConfig) = cli.command {
        config.validate()?;
        println!("configuration {} is valid", cli.config.display());
        return Ok(());
    }

    let guard = telemetry::init(&config.telemetry);
    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::MigrateTokens => migrate_tokens(&config).await,
        _ => run(&config).await,
    };
    guard.shutdown();
    result
}

async fn run(config: &SinkbridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::build(config).await?;
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });
    app.run(shutdown).await?;
    Ok(())
}

async fn migrate_tokens(config: &SinkbridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::build(config).await?;
    let migrated = app.migrate_tokens().await?;
    info!(migrated, "token migration finished");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
