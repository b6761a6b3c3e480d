//! Output formatting utilities for the CLI
//!
//! Provides table and JSON formatting with colors.

use anyhow::Result;
use anyapp_core::api::{
    ApplicationReport, ApplicationSpecReport, ApplicationSummary, EventRecord, InfoResponse,
};
use anyapp_core::{AnyApplication, GlobalState};
use colored::*;
use std::collections::BTreeMap;

use tabled::{settings::Style, Table, Tabled};

/// Output format options
#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Global state with a color matching its severity
pub fn colored_state(state: GlobalState) -> String {
    let text = state.as_str();
    match state {
        GlobalState::Operational => text.green().to_string(),
        GlobalState::Failure => text.red().bold().to_string(),
        GlobalState::Placement | GlobalState::Relocation | GlobalState::OwnershipTransfer => {
            text.yellow().to_string()
        }
        GlobalState::New => text.cyan().to_string(),
        GlobalState::Unknown => text.dimmed().to_string(),
    }
}

/// Condition status colored by outcome
fn colored_condition_status(status: &str) -> String {
    match status {
        "Done" | "Success" | "Healthy" => status.green().to_string(),
        "Failure" | "Degraded" | "Missing" => status.red().to_string(),
        "InProgress" | "Pull" | "Pulling" | "Undeploy" | "Progressing" => {
            status.yellow().to_string()
        }
        _ => status.to_string(),
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

/// Format info response
pub fn format_info(info: &InfoResponse, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(info)?),
        OutputFormat::Table => {
            let mut output = String::new();
            output.push_str(&"AnyApplication Zone Daemon".bold().to_string());
            output.push('\n');
            output.push_str(&format!("Zone: {}", info.zone.cyan()));
            output.push('\n');
            output.push_str(&format!("Version: {}", info.version.cyan()));
            output.push('\n');
            output.push_str(&format!(
                "Uptime: {} seconds",
                info.uptime.to_string().yellow()
            ));
            output.push('\n');
            output.push_str(&format!(
                "Cluster: {}",
                if info.mock {
                    "mock".yellow()
                } else {
                    "kubernetes".green()
                }
            ));
            output.push('\n');
            output.push_str(&format!("Applications: {}", info.applications));
            output.push('\n');
            output.push_str(&format!("Running jobs: {}", info.running_jobs));
            output.push('\n');
            output.push_str(&format!("Peers: {}", join_or_dash(&info.peers)));
            Ok(output)
        }
    }
}

/// Format health check results
pub fn format_health(
    health: &BTreeMap<String, serde_json::Value>,
    server_url: &str,
    format: &OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(health)?),
        OutputFormat::Table => {
            let flag = |key: &str| health.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
            let text = |key: &str| {
                health
                    .get(key)
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            };

            let mut output = String::new();
            output.push_str(&"Health Check".bold().to_string());
            output.push('\n');
            output.push_str(&format!("Server: {}", server_url.cyan()));
            output.push('\n');

            if !flag("connected") {
                output.push_str(&format!("Connectivity: {}", "unreachable".red()));
                return Ok(output);
            }
            output.push_str(&format!(
                "Connectivity: {} ({} ms)",
                "ok".green(),
                text("ping_ms").unwrap_or_default()
            ));
            output.push('\n');

            if flag("api_working") {
                output.push_str(&format!("API: {}", "ok".green()));
                for (label, key) in [
                    ("Zone", "zone"),
                    ("Version", "server_version"),
                    ("Applications", "applications"),
                    ("Running jobs", "running_jobs"),
                ] {
                    if let Some(value) = text(key) {
                        output.push('\n');
                        output.push_str(&format!("{}: {}", label, value));
                    }
                }
            } else {
                output.push_str(&format!(
                    "API: {} {}",
                    "failing".red(),
                    text("api_error").unwrap_or_default()
                ));
            }
            Ok(output)
        }
    }
}

/// Format the application list
pub fn format_applications(apps: &[ApplicationSummary], format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(apps)?),
        OutputFormat::Table => {
            if apps.is_empty() {
                return Ok("No applications found".yellow().to_string());
            }

            #[derive(Tabled)]
            struct AppRow {
                #[tabled(rename = "Namespace")]
                namespace: String,
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "State")]
                state: String,
                #[tabled(rename = "Owner")]
                owner: String,
                #[tabled(rename = "Placements")]
                placements: String,
                #[tabled(rename = "Chart")]
                chart: String,
                #[tabled(rename = "Zones")]
                zones: String,
            }

            let rows: Vec<AppRow> = apps
                .iter()
                .map(|app| AppRow {
                    namespace: app.namespace.clone(),
                    name: app.name.clone(),
                    state: colored_state(app.state),
                    owner: if app.owner.is_empty() {
                        "-".to_string()
                    } else {
                        app.owner.clone()
                    },
                    placements: app
                        .placements
                        .as_deref()
                        .map(join_or_dash)
                        .unwrap_or_else(|| "pending".dimmed().to_string()),
                    chart: format!("{}:{}", app.chart, app.chart_version),
                    zones: join_or_dash(&app.zones),
                })
                .collect();

            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
    }
}

/// Format a single application with its zone conditions
pub fn format_application(app: &AnyApplication, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(app)?),
        OutputFormat::Table => {
            let status = &app.status;
            let mut output = String::new();
            output.push_str(&format!("{}", app.id().to_string().bold()));
            output.push('\n');
            output.push_str(&format!("State: {}", colored_state(status.state)));
            output.push('\n');
            output.push_str(&format!(
                "Owner: {}",
                if status.owner.is_empty() { "-" } else { status.owner.as_str() }
            ));
            output.push('\n');
            output.push_str(&format!(
                "Placements: {}",
                match &status.placements {
                    Some(_) => join_or_dash(&status.placement_zones()),
                    None => "pending".to_string(),
                }
            ));
            output.push('\n');
            if let Some(helm) = app.helm() {
                output.push_str(&format!(
                    "Chart: {} {} ({})",
                    helm.chart.cyan(),
                    helm.version,
                    helm.repository
                ));
                output.push('\n');
            }
            output.push_str(&format!(
                "Strategy: {:?}, zones wanted: {}, tolerance: {}, max retries: {}",
                app.spec.placement_strategy.strategy,
                app.spec.zones,
                app.spec.recover_strategy.tolerance,
                app.spec.recover_strategy.max_retries
            ));

            #[derive(Tabled)]
            struct ConditionRow {
                #[tabled(rename = "Zone")]
                zone: String,
                #[tabled(rename = "Version")]
                version: i64,
                #[tabled(rename = "Type")]
                condition_type: String,
                #[tabled(rename = "Status")]
                status: String,
                #[tabled(rename = "Since")]
                since: String,
                #[tabled(rename = "Message")]
                msg: String,
            }

            let mut rows = Vec::new();
            for zone in &status.zones {
                if zone.conditions.is_empty() {
                    rows.push(ConditionRow {
                        zone: zone.zone_id.clone(),
                        version: zone.zone_version,
                        condition_type: "-".to_string(),
                        status: "-".to_string(),
                        since: "-".to_string(),
                        msg: String::new(),
                    });
                }
                for condition in &zone.conditions {
                    let mut msg = condition.msg.clone();
                    if condition.retry_attempt > 0 {
                        msg = format!("{} (retry {})", msg, condition.retry_attempt);
                    }
                    rows.push(ConditionRow {
                        zone: zone.zone_id.clone(),
                        version: zone.zone_version,
                        condition_type: condition.condition_type.to_string(),
                        status: colored_condition_status(&condition.status),
                        since: condition
                            .last_transition_time
                            .format("%Y-%m-%d %H:%M:%S")
                            .to_string(),
                        msg,
                    });
                }
            }

            if !rows.is_empty() {
                output.push_str("\n\n");
                output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
            }
            Ok(output)
        }
    }
}

/// Format a runtime report
pub fn format_report(report: &ApplicationReport, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Table => {
            let mut output = String::new();
            output.push_str(&format!(
                "{}/{} in zone {}: {}",
                report.namespace,
                report.name.bold(),
                report.zone.cyan(),
                colored_state(report.state)
            ));

            if report.workloads.is_empty() {
                output.push('\n');
                output.push_str(&"No workloads deployed in this zone".yellow().to_string());
                return Ok(output);
            }

            #[derive(Tabled)]
            struct WorkloadRow {
                #[tabled(rename = "Kind")]
                kind: String,
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "Ready")]
                ready: String,
                #[tabled(rename = "Available")]
                available: i64,
                #[tabled(rename = "Message")]
                message: String,
            }

            let workloads: Vec<WorkloadRow> = report
                .workloads
                .iter()
                .map(|w| WorkloadRow {
                    kind: w.kind.clone(),
                    name: w.name.clone(),
                    ready: if w.ready >= w.desired {
                        format!("{}/{}", w.ready, w.desired).green().to_string()
                    } else {
                        format!("{}/{}", w.ready, w.desired).yellow().to_string()
                    },
                    available: w.available,
                    message: w.message.clone(),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(workloads).with(Style::rounded()).to_string());

            #[derive(Tabled)]
            struct PodRow {
                #[tabled(rename = "Pod")]
                name: String,
                #[tabled(rename = "Status")]
                status: String,
                #[tabled(rename = "Restarts")]
                restarts: i64,
            }

            if !report.pods.is_empty() {
                let pods: Vec<PodRow> = report
                    .pods
                    .iter()
                    .map(|p| PodRow {
                        name: p.name.clone(),
                        status: match p.status.as_str() {
                            "Running" | "Succeeded" => p.status.green().to_string(),
                            "Failed" => p.status.red().to_string(),
                            _ => p.status.yellow().to_string(),
                        },
                        restarts: p.restarts,
                    })
                    .collect();
                output.push('\n');
                output.push_str(&Table::new(pods).with(Style::rounded()).to_string());

                for pod in &report.pods {
                    for log in pod.logs.iter().filter(|l| !l.log.is_empty()) {
                        output.push_str(&format!(
                            "\n\n{} {}/{}\n{}",
                            "Logs".bold(),
                            pod.name,
                            log.container,
                            log.log.trim_end()
                        ));
                    }
                }
            }
            Ok(output)
        }
    }
}

/// Format resource requests, limits and storage
pub fn format_spec_report(report: &ApplicationSpecReport, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Table => {
            fn pairs(values: &BTreeMap<String, String>) -> String {
                if values.is_empty() {
                    return "-".to_string();
                }
                values
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ")
            }

            #[derive(Tabled)]
            struct PodRow {
                #[tabled(rename = "Workload")]
                id: String,
                #[tabled(rename = "Replicas")]
                replica: i64,
                #[tabled(rename = "Requests")]
                requests: String,
                #[tabled(rename = "Limits")]
                limits: String,
            }

            #[derive(Tabled)]
            struct PvcRow {
                #[tabled(rename = "Claim")]
                id: String,
                #[tabled(rename = "Replicas")]
                replica: i64,
                #[tabled(rename = "Storage Class")]
                storage_class: String,
                #[tabled(rename = "Storage")]
                storage: String,
            }

            let mut output = format!("{}/{}", report.namespace, report.name.bold());
            if report.pods.is_empty() && report.pvcs.is_empty() {
                output.push('\n');
                output.push_str(&"No resources declared".yellow().to_string());
                return Ok(output);
            }

            if !report.pods.is_empty() {
                let rows: Vec<PodRow> = report
                    .pods
                    .iter()
                    .map(|p| PodRow {
                        id: p.id.clone(),
                        replica: p.replica,
                        requests: pairs(&p.requests),
                        limits: pairs(&p.limits),
                    })
                    .collect();
                output.push('\n');
                output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
            }

            if !report.pvcs.is_empty() {
                let rows: Vec<PvcRow> = report
                    .pvcs
                    .iter()
                    .map(|p| PvcRow {
                        id: p.id.clone(),
                        replica: p.replica,
                        storage_class: p.storage_class.clone().unwrap_or_else(|| "-".to_string()),
                        storage: p.storage.clone(),
                    })
                    .collect();
                output.push('\n');
                output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
            }
            Ok(output)
        }
    }
}

/// Format application events
pub fn format_events(events: &[EventRecord], format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(events)?),
        OutputFormat::Table => {
            if events.is_empty() {
                return Ok("No events recorded".yellow().to_string());
            }

            #[derive(Tabled)]
            struct EventRow {
                #[tabled(rename = "Time")]
                timestamp: String,
                #[tabled(rename = "Reason")]
                reason: String,
                #[tabled(rename = "Message")]
                msg: String,
            }

            let rows: Vec<EventRow> = events
                .iter()
                .map(|e| EventRow {
                    timestamp: e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    reason: e.reason.clone(),
                    msg: e.msg.clone(),
                })
                .collect();

            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
    }
}

/// Format success message
pub fn format_success(message: &str) -> String {
    format!("{} {}", "✓".green(), message)
}
