//! CLI argument parsing for powergraph

use crate::config::GraphConfig;
use crate::error::Result;
use crate::store::Time;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "powergraph")]
#[command(version)]
#[command(about = "Time-versioned power attribution graph", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Measurement id, overrides the configuration
    #[arg(short, long, value_name = "ID")]
    pub measurement: Option<String>,

    /// JSON snapshot of the graph, overrides the configuration
    #[arg(short, long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Ingest sample batches, one JSON array per line ("-" reads stdin)
    Ingest {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Print the measurement as it stood at a point in time, as JSON
    Report {
        #[arg(long, value_name = "TIME", allow_negative_numbers = true)]
        at: Time,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn graph_config(&self) -> Result<GraphConfig> {
        let mut config = match &self.config {
            Some(path) => GraphConfig::from_file(path)?,
            None => GraphConfig::default(),
        };
        if let Some(measurement) = &self.measurement {
            config.measurement = measurement.clone();
        }
        if let Some(snapshot) = &self.snapshot {
            config.store.snapshot_path = Some(snapshot.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_ingest() {
        let cli = Cli::try_parse_from(["powergraph", "ingest", "samples.jsonl"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Ingest {
                input: PathBuf::from("samples.jsonl")
            }
        );
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_report_with_overrides() {
        let cli = Cli::try_parse_from([
            "powergraph",
            "-m",
            "run-2",
            "--snapshot",
            "/tmp/g.json",
            "report",
            "--at",
            "12346",
        ])
        .unwrap();
        assert_eq!(cli.command, Command::Report { at: 12346, pretty: false });

        let config = cli.graph_config().unwrap();
        assert_eq!(config.measurement, "run-2");
        assert_eq!(config.store.snapshot_path, Some(PathBuf::from("/tmp/g.json")));
    }

    #[test]
    fn test_cli_report_requires_time() {
        assert!(Cli::try_parse_from(["powergraph", "report"]).is_err());
    }

    #[test]
    fn test_cli_rejects_empty_measurement() {
        let cli = Cli::try_parse_from(["powergraph", "-m", "", "report", "--at", "1"]).unwrap();
        assert!(cli.graph_config().is_err());
    }
}
