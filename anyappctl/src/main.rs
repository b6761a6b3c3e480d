//! AnyApplication CLI
//!
//! Command-line interface for a zone daemon.

use anyhow::Result;
use anyappctl::cli::{
    generate_completion, handle_apply, handle_config, handle_delete, handle_events, handle_get,
    handle_health, handle_info, handle_list, handle_place, handle_spec, handle_status,
    handle_take_ownership, Cli, Commands, OutputFormat,
};
use anyappctl::client::AnyAppClient;
use anyappctl::config::CliConfig;
use clap::Parser;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completion { shell } = cli.command {
        generate_completion(shell);
        return Ok(());
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => CliConfig::config_path().unwrap_or_else(|_| PathBuf::from("anyapp-cli.toml")),
    };

    // Priority chain: defaults → file → env → CLI args
    let config = match build_config(&cli, &config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            if cli.verbose {
                eprintln!("Error details: {:?}", e);
            }
            std::process::exit(1);
        }
    };

    let output_format = match config.output_format.as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Table,
    };
    let verbose = config.verbose;

    if verbose {
        eprintln!("Verbose mode enabled");
        eprintln!("Server URL: {}", config.server_url);
        eprintln!("Output format: {:?}", output_format);
        eprintln!("Config file: {}", config_path.display());
    }

    let client = AnyAppClient::with_config(
        config.server_url.clone(),
        config.timeout,
        3,
        std::time::Duration::from_millis(500),
    )?;

    let result = match cli.command {
        Commands::Info => handle_info(&client, &output_format).await,
        Commands::Health => handle_health(&client, &output_format).await,
        Commands::List => handle_list(&client, &output_format).await,
        Commands::Get { id } => handle_get(&client, &id, &output_format).await,
        Commands::Apply { file } => handle_apply(&client, &file, &output_format).await,
        Commands::Delete { id } => handle_delete(&client, &id, &output_format).await,
        Commands::Place { id, zones } => handle_place(&client, &id, zones, &output_format).await,
        Commands::TakeOwnership { id } => {
            handle_take_ownership(&client, &id, &output_format).await
        }
        Commands::Status { id } => handle_status(&client, &id, &output_format).await,
        Commands::Spec { id } => handle_spec(&client, &id, &output_format).await,
        Commands::Events { id, limit } => {
            handle_events(&client, &id, limit, &output_format).await
        }
        Commands::Config { command } => {
            handle_config(command, &config, &config_path, &output_format)
        }
        Commands::Completion { .. } => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if verbose {
            eprintln!("Error details: {:?}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn build_config(cli: &Cli, config_path: &std::path::Path) -> Result<CliConfig> {
    let mut builder = CliConfig::builder();

    if !cli.no_config {
        builder = builder.with_config_file_at(config_path)?;
    }

    builder = builder.with_env_overrides();

    if let Some(ref server) = cli.server {
        builder = builder.with_server_url(server)?;
    }
    if let Some(ref format) = cli.format {
        builder = builder.with_output_format(format.as_str())?;
    }
    if cli.verbose {
        builder = builder.with_verbose(true);
    }

    builder.build()
}
