mod cli;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use roomboard::application::commands::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,roomboard=debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let state = AppState::new(workspace_root.clone())
        .with_context(|| format!("failed to initialize workspace {}", workspace_root.display()))?;

    cli::dispatch(&state, cli.command, cli.json).await
}
