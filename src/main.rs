//! File hub server - publish files to a content store and record them on a ledger
//!
//! Usage:
//!   filehub-server [OPTIONS] <CONFIG>
//!
//! Example:
//!   PINATA_API_KEY=... PINATA_API_SECRET=... FILEHUB_SIGNING_KEY=... \
//!     filehub-server /etc/filehub.toml

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use filehub::app::{build_state, Secrets};
use filehub::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "filehub-server")]
#[command(about = "Publish files to a content store and record them on a ledger")]
struct Cli {
    /// Path to configuration file (TOML)
    config: PathBuf,

    /// Override the listen address from the config
    #[arg(long)]
    bind: Option<String>,

    /// Pinning service API key
    #[arg(long, env = "PINATA_API_KEY", hide_env_values = true)]
    pinata_api_key: Option<String>,

    /// Pinning service API secret
    #[arg(long, env = "PINATA_API_SECRET", hide_env_values = true)]
    pinata_api_secret: Option<String>,

    /// Hex ed25519 secret key used to sign ledger submissions
    #[arg(long, env = "FILEHUB_SIGNING_KEY", hide_env_values = true)]
    signing_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    // Initialize logging; RUST_LOG wins over the config file
    env_logger::Builder::from_env(Env::default().default_filter_or(config.server.log_level.as_str()))
        .init();

    log::info!("File hub v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Loaded configuration from {:?}", cli.config);
    log::info!("  Scheme:  {}", config.publish.scheme);
    log::info!("  Uploads: {:?}", config.server.upload_dir);

    let secrets = Secrets {
        pinata_api_key: cli.pinata_api_key,
        pinata_api_secret: cli.pinata_api_secret,
        signing_key: cli.signing_key,
    };
    let state = build_state(&config, &secrets)?;

    tokio::fs::create_dir_all(&config.server.upload_dir)
        .await
        .with_context(|| format!("failed to create {:?}", config.server.upload_dir))?;

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    filehub::server::serve(listener, state)
        .await
        .context("HTTP server terminated unexpectedly")
}
