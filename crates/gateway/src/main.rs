use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bh_domain::config::Config;
use bh_gateway::api;
use bh_gateway::bootstrap::{build_app_state, spawn_background, BootstrapOptions};

#[derive(Parser)]
#[command(name = "bothive", about = "Multi-tenant AI-agent runtime")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "bothive.toml")]
    config: PathBuf,

    /// Directory for persisted state (messages, schedules, inbox).
    #[arg(long, default_value = "./data")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default).
    Serve,
    /// Print the version.
    Version,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("bothive {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Arc::new(load_config(&cli.config)?);
            run_server(config, cli.state_dir).await
        }
    }
}

async fn run_server(config: Arc<Config>, state_dir: PathBuf) -> anyhow::Result<()> {
    let addr = config.server.addr.clone();
    let state = build_app_state(
        config,
        BootstrapOptions {
            state_dir: Some(state_dir),
            ..Default::default()
        },
    )?;

    let _scheduler = spawn_background(&state);
    let router = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "bothive gateway listening");
    axum::serve(listener, router).await.context("serving HTTP")
}
