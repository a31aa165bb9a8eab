//! Recall entry point
//!
//! Initializes the process-wide memory engine from `--data-dir`, runs one
//! maintenance command and prints its JSON result on stdout.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use recall_cli::{run, Cli, CliError};
use recall_memory::{global, EngineConfig, HashingEmbedder, VectorEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_filter = if cli.verbose {
        "recall=debug,recall_cli=debug,recall_memory=debug"
    } else {
        "recall=info,recall_cli=info,recall_memory=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = e
                .downcast_ref::<CliError>()
                .map(CliError::exit_code)
                .unwrap_or(70);
            ExitCode::from(code as u8)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = EngineConfig::load(&cli.data_dir);
    let vectors = if cli.lexical_only {
        VectorEngine::disabled()
    } else {
        VectorEngine::new(Arc::new(HashingEmbedder::default()))
    };

    let manager = global();
    manager
        .initialize(config, vectors)
        .await
        .map_err(CliError::from)
        .with_context(|| format!("Failed to open memory data at {}", cli.data_dir.display()))?;
    let engine = manager.engine().await.map_err(CliError::from)?;

    let outcome = run(cli.command, &engine).await;
    // persist even when the command failed
    let teardown = manager.teardown().await;

    let value = outcome?;
    teardown.map_err(CliError::from)?;
    println!("{}", serde_json::to_string_pretty(&value).map_err(CliError::from)?);
    Ok(())
}
