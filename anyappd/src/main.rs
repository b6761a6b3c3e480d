//! AnyApplication zone daemon
//!
//! Runs the AnyApplication controller for one zone and serves its REST API.
//!
//! # Configuration
//!
//! The configuration file is looked up in this order:
//!
//! 1. `--config <path>`
//! 2. the `ANYAPP_CONFIG` environment variable
//! 3. the default path (`~/.config/anyapp/config.yaml`)
//!
//! A missing file falls back to the built-in defaults. `--bind` and `--zone`
//! override the values read from the file.

mod api;
mod shutdown;
mod zone;

use anyapp_core::config::LoggingConfig;
use anyapp_core::{default_config_path, Config};
use anyhow::{Context, Result};
use api::AppState;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::info;
use zone::ZoneServices;

/// AnyApplication zone daemon
#[derive(Parser, Debug)]
#[command(name = "anyappd")]
#[command(version, about = "AnyApplication zone daemon", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server bind address (host:port), overrides `api.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Zone id, overrides `runtime.zone`
    #[arg(short, long)]
    zone: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run against an in-memory cluster whose workloads become ready by themselves
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Determine config path: CLI flag > env var > default
    let config_path = args.config.clone().unwrap_or_else(|| {
        std::env::var("ANYAPP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path())
    });

    let config = load_config(&config_path, &args)?;

    init_tracing(args.verbose, &config.logging);

    info!("AnyApplication daemon starting...");
    info!("Configuration file: {}", config_path.display());
    info!("Zone: {}", config.runtime.zone_id);

    let services = ZoneServices::build(&config, args.mock).await?;

    let (stop, shutdown_rx) = watch::channel(false);
    let handles = services.spawn_background(&shutdown_rx);

    let app = api::create_router(AppState::new(&services));

    let bind_addr = &config.api.bind_address;
    info!("Starting server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!("AnyApplication API listening on {}", bind_addr);
    info!("Server ready!");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    shutdown::stop_background(&services, stop, handles, shutdown::BACKGROUND_STOP_TIMEOUT).await;

    info!("Server shutdown complete");
    Ok(())
}

/// Read the configuration and apply command line overrides.
fn load_config(path: &Path, args: &Args) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        eprintln!(
            "Configuration file {} not found, using defaults",
            path.display()
        );
        Config::default()
    };

    if let Some(bind) = &args.bind {
        config.api.bind_address = bind.clone();
    }
    if let Some(zone) = &args.zone {
        config.runtime.zone_id = zone.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Initialize tracing subscriber for logging.
///
/// `RUST_LOG` wins over the configured levels; `--verbose` forces debug.
fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(logging.filter_directives())
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["anyappd"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.yaml"), &args(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "runtime:\n  zone: zone-a\napi:\n  bind_address: 127.0.0.1:8090\n",
        )
        .unwrap();

        let config = load_config(&path, &args(&[])).unwrap();
        assert_eq!(config.runtime.zone_id, "zone-a");

        let config = load_config(
            &path,
            &args(&["--bind", "0.0.0.0:9000", "--zone", "zone-b", "--mock"]),
        )
        .unwrap();
        assert_eq!(config.api.bind_address, "0.0.0.0:9000");
        assert_eq!(config.runtime.zone_id, "zone-b");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "runtime: [not, a, map]\n").unwrap();
        assert!(load_config(&path, &args(&[])).is_err());

        let path = dir.path().join("empty-zone.yaml");
        std::fs::write(&path, "runtime:\n  zone: ''\n").unwrap();
        assert!(load_config(&path, &args(&[])).is_err());
    }
}
