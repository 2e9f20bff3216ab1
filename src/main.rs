use anyhow::{Context, Result};
use clap::Parser;
use powergraph::cli::{Cli, Command};
use powergraph::query;
use powergraph::reporter::GraphReporter;
use powergraph::sample;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug || std::env::var_os("RUST_LOG").is_some() {
        let filter = if debug {
            EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
        } else {
            EnvFilter::from_default_env()
        };
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Returns the number of samples that failed
fn ingest(reporter: &GraphReporter, input: &Path) -> Result<usize> {
    reporter
        .ensure_measurement()
        .context("Failed to create the measurement")?;
    let mut failed = 0;
    for (number, batch) in sample::read_batches(open_input(input)?).enumerate() {
        let batch = batch?;
        let report = reporter
            .ingest(&batch)
            .with_context(|| format!("Batch {} could not be saved", number + 1))?;
        println!(
            "batch {}: {} cpu, {} disk (total {} W), {} recorded, {} failed",
            number + 1,
            report.cpu_samples,
            report.disk_samples,
            report.disk_total,
            report.recorded(),
            report.failures.len()
        );
        for failure in &report.failures {
            eprintln!(
                "  sample {} ({} / thread {} @ {}): {}",
                failure.index, failure.method_name, failure.thread_id, failure.timestamp, failure.error
            );
        }
        failed += report.failures.len();
    }
    Ok(failed)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = args.graph_config().context("Invalid configuration")?;
    let reporter = GraphReporter::from_config(&config)?;
    reporter.connect().context("Failed to connect to the graph store")?;

    let failed = match &args.command {
        Command::Ingest { input } => ingest(&reporter, input)?,
        Command::Report { at, pretty } => {
            let report =
                query::measurement_report(reporter.graph(), reporter.world(), reporter.measurement(), *at)?
                    .with_context(|| format!("Unknown measurement '{}'", reporter.measurement()))?;
            let json = if *pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{}", json);
            0
        }
    };

    reporter.disconnect().context("Failed to disconnect from the graph store")?;
    if failed > 0 {
        anyhow::bail!("{} sample(s) could not be recorded", failed);
    }
    Ok(())
}
