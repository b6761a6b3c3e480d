//! CLI command and subcommand definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AnyApplication zone CLI
#[derive(Parser, Debug)]
#[command(name = "anyappctl")]
#[command(version, about = "Manage AnyApplications through a zone daemon", long_about = None)]
pub struct Cli {
    /// Zone daemon URL (overrides config file)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Output format (overrides config file)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Don't load config file
    #[arg(long)]
    pub no_config: bool,

    /// Config file path (default: <config_dir>/anyapp/cli.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty table output
    Table,
    /// JSON output
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
        }
    }
}

impl From<&OutputFormat> for crate::format::OutputFormat {
    fn from(format: &OutputFormat) -> Self {
        match format {
            OutputFormat::Table => crate::format::OutputFormat::Table,
            OutputFormat::Json => crate::format::OutputFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show zone daemon information
    Info,

    /// Check daemon connectivity and health
    Health,

    /// List applications known to the zone
    List,

    /// Show an application with its per-zone status
    Get {
        /// Application as <namespace>/<name> (namespace defaults to "default")
        id: String,
    },

    /// Create or update applications from a YAML or JSON file
    Apply {
        /// Manifest file; YAML may hold several documents
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },

    /// Delete an application
    Delete {
        /// Application as <namespace>/<name>
        id: String,
    },

    /// Set the zones a Global strategy application runs in
    Place {
        /// Application as <namespace>/<name>
        id: String,
        /// Comma-separated zone ids
        #[arg(short, long, value_delimiter = ',', required = true)]
        zones: Vec<String>,
    },

    /// Request ownership of an application for the daemon's zone
    TakeOwnership {
        /// Application as <namespace>/<name>
        id: String,
    },

    /// Show workloads, pods and logs of an application in this zone
    Status {
        /// Application as <namespace>/<name>
        id: String,
    },

    /// Show resource requests, limits and storage of an application
    Spec {
        /// Application as <namespace>/<name>
        id: String,
    },

    /// Show recent events of an application
    Events {
        /// Application as <namespace>/<name>
        id: String,
        /// Only show the most recent N events
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show or manage CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Set configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Reset configuration to defaults
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_place_splits_zones() {
        let cli = Cli::parse_from(["anyappctl", "place", "default/web", "--zones", "a,b"]);
        match cli.command {
            Commands::Place { id, zones } => {
                assert_eq!(id, "default/web");
                assert_eq!(zones, vec!["a", "b"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "anyappctl",
            "--server",
            "http://zone-b:8090",
            "--format",
            "json",
            "--verbose",
            "--no-config",
            "events",
            "web",
            "-n",
            "5",
        ]);
        assert_eq!(cli.server.as_deref(), Some("http://zone-b:8090"));
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(cli.verbose);
        assert!(cli.no_config);
        assert!(matches!(cli.command, Commands::Events { limit: Some(5), .. }));
    }

    #[test]
    fn test_apply_requires_file() {
        assert!(Cli::try_parse_from(["anyappctl", "apply"]).is_err());
        assert!(Cli::try_parse_from(["anyappctl", "apply", "-f", "app.yaml"]).is_ok());
    }
}
