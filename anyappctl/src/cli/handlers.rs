//! Command execution handlers

use anyhow::{Context, Result};
use anyapp_core::{AnyApplication, ApplicationId};
use serde::Deserialize;
use std::path::Path;

use crate::client::AnyAppClient;
use crate::config::CliConfig;
use crate::format::format_success;

use super::commands::*;

fn parse_id(id: &str) -> Result<ApplicationId> {
    ApplicationId::parse(id).map_err(|e| anyhow::anyhow!("{}", e))
}

/// Read every application in a YAML or JSON manifest.
///
/// YAML files may hold several `---` separated documents; empty documents are
/// skipped. Applications without a namespace land in `default`.
pub fn read_manifest(path: &Path) -> Result<Vec<AnyApplication>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    parse_manifest(&content).with_context(|| format!("Invalid manifest {}", path.display()))
}

pub fn parse_manifest(content: &str) -> Result<Vec<AnyApplication>> {
    let mut apps: Vec<AnyApplication> = Vec::new();
    if content.trim_start().starts_with('{') || content.trim_start().starts_with('[') {
        let value: serde_json::Value = serde_json::from_str(content)?;
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    apps.push(serde_json::from_value(item)?);
                }
            }
            other => apps.push(serde_json::from_value(other)?),
        }
    } else {
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            apps.push(serde_yaml::from_value(value)?);
        }
    }

    if apps.is_empty() {
        return Err(anyhow::anyhow!("No AnyApplication found"));
    }
    for app in &mut apps {
        if app.metadata.namespace.is_empty() {
            app.metadata.namespace = "default".to_string();
        }
        app.validate().map_err(|e| anyhow::anyhow!("{}: {}", app.id(), e))?;
    }
    Ok(apps)
}

/// Handle info command
pub async fn handle_info(client: &AnyAppClient, format: &OutputFormat) -> Result<()> {
    let info = client.get_info().await?;
    println!("{}", crate::format::format_info(&info, &format.into())?);
    Ok(())
}

/// Handle health command
pub async fn handle_health(client: &AnyAppClient, format: &OutputFormat) -> Result<()> {
    let health = client.health_check().await?;
    println!(
        "{}",
        crate::format::format_health(&health, client.base_url(), &format.into())?
    );

    let api_working = health
        .get("api_working")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !api_working {
        return Err(anyhow::anyhow!("Zone daemon is not healthy"));
    }
    Ok(())
}

/// Handle list command
pub async fn handle_list(client: &AnyAppClient, format: &OutputFormat) -> Result<()> {
    let apps = client.list_applications().await?;
    println!("{}", crate::format::format_applications(&apps, &format.into())?);
    Ok(())
}

/// Handle get command
pub async fn handle_get(client: &AnyAppClient, id: &str, format: &OutputFormat) -> Result<()> {
    let app = client.get_application(&parse_id(id)?).await?;
    println!("{}", crate::format::format_application(&app, &format.into())?);
    Ok(())
}

/// Handle apply command
pub async fn handle_apply(client: &AnyAppClient, file: &Path, format: &OutputFormat) -> Result<()> {
    let apps = read_manifest(file)?;

    let mut applied = Vec::with_capacity(apps.len());
    for app in &apps {
        let (stored, created) = client.apply_application(app).await?;
        if matches!(format, OutputFormat::Table) {
            let verb = if created { "created" } else { "configured" };
            println!("{}", format_success(&format!("{} {}", stored.id(), verb)));
        }
        applied.push(stored);
    }

    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&applied)?);
    }
    Ok(())
}

/// Handle delete command
pub async fn handle_delete(client: &AnyAppClient, id: &str, format: &OutputFormat) -> Result<()> {
    let id = parse_id(id)?;
    client.delete_application(&id).await?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "deleted": id.to_string() }))?
        ),
        OutputFormat::Table => println!("{}", format_success(&format!("{} deleted", id))),
    }
    Ok(())
}

/// Handle place command
pub async fn handle_place(
    client: &AnyAppClient,
    id: &str,
    zones: Vec<String>,
    format: &OutputFormat,
) -> Result<()> {
    let id = parse_id(id)?;
    let app = client.set_placements(&id, zones).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&app)?),
        OutputFormat::Table => println!(
            "{}",
            format_success(&format!(
                "{} placed in {}",
                id,
                app.status.placement_zones().join(", ")
            ))
        ),
    }
    Ok(())
}

/// Handle take-ownership command
pub async fn handle_take_ownership(
    client: &AnyAppClient,
    id: &str,
    format: &OutputFormat,
) -> Result<()> {
    let id = parse_id(id)?;
    let app = client.take_ownership(&id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&app)?),
        OutputFormat::Table => {
            let info = client.get_info().await?;
            if app.status.owner == info.zone {
                println!(
                    "{}",
                    format_success(&format!("{} is owned by {}", id, info.zone))
                );
            } else {
                println!(
                    "{}",
                    format_success(&format!(
                        "Ownership of {} requested for {} (current owner: {})",
                        id, info.zone, app.status.owner
                    ))
                );
            }
        }
    }
    Ok(())
}

/// Handle status command
pub async fn handle_status(client: &AnyAppClient, id: &str, format: &OutputFormat) -> Result<()> {
    let report = client.status_report(&parse_id(id)?).await?;
    println!("{}", crate::format::format_report(&report, &format.into())?);
    Ok(())
}

/// Handle spec command
pub async fn handle_spec(client: &AnyAppClient, id: &str, format: &OutputFormat) -> Result<()> {
    let report = client.spec_report(&parse_id(id)?).await?;
    println!("{}", crate::format::format_spec_report(&report, &format.into())?);
    Ok(())
}

/// Handle events command
pub async fn handle_events(
    client: &AnyAppClient,
    id: &str,
    limit: Option<usize>,
    format: &OutputFormat,
) -> Result<()> {
    let events = client.events(&parse_id(id)?, limit).await?;
    println!("{}", crate::format::format_events(&events, &format.into())?);
    Ok(())
}

/// Handle config command
///
/// `set` and `reset` write to `config_path`.
pub fn handle_config(
    command: ConfigCommands,
    current_config: &CliConfig,
    config_path: &Path,
    format: &OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(current_config)?);
            }
            OutputFormat::Table => {
                println!("CLI Configuration:");
                println!("{:<20} Value", "Setting");
                println!("{}", "-".repeat(40));
                println!("{:<20} {}", "Server URL", current_config.server_url);
                println!("{:<20} {}", "Output Format", current_config.output_format);
                println!("{:<20} {}", "Verbose", current_config.verbose);
                println!("{:<20} {}s", "Timeout", current_config.timeout);
            }
        },
        ConfigCommands::Path => println!("{}", config_path.display()),
        ConfigCommands::Set { key, value } => {
            let config = set_config_value(CliConfig::load_from(config_path)?, &key, &value)?;
            config.save_to(config_path)?;
            println!("{}", format_success(&format!("Set {} = {}", key, value)));
        }
        ConfigCommands::Reset => {
            CliConfig::default().save_to(config_path)?;
            println!("{}", format_success("Configuration reset to defaults"));
        }
    }

    Ok(())
}

/// Apply one `key = value` change, validating it like any other layer.
fn set_config_value(config: CliConfig, key: &str, value: &str) -> Result<CliConfig> {
    let builder = CliConfig::builder()
        .with_server_url(config.server_url)?
        .with_output_format(config.output_format)?
        .with_timeout(config.timeout)?
        .with_verbose(config.verbose);

    let builder = match key {
        "server_url" => builder.with_server_url(value)?,
        "output_format" => builder.with_output_format(value)?,
        "verbose" => builder.with_verbose(value.eq_ignore_ascii_case("true") || value == "1"),
        "timeout" => builder.with_timeout(
            value
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid timeout value. Must be a number"))?,
        )?,
        _ => return Err(anyhow::anyhow!("Unknown config key: {}", key)),
    };
    builder.build()
}

/// Generate shell completion script
pub fn generate_completion(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
