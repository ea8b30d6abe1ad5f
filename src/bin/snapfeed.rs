//! snapfeed CLI
//!
//! Acquires dated snapshots of a dataset and runs downstream tools at most once per
//! new snapshot.
//!
//! Exit codes: `0` success or skip, `2` integrity check failed (payload quarantined),
//! `3` transport, `4` filesystem, `5` downstream tool, `64` usage, `130` interrupted.

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use log::{error, warn};
use serde::Serialize;
use snapfeed::{
    default_marker_path, CommandProcessor, DownstreamError, GateOutcome, Marker, MarkerGate,
    Pipeline, PipelineReport, ResolvedSnapshot, SnapfeedError, SnapshotFormat, SnapshotStore,
    SourceDescriptor, StatusReport, ToolResolver,
};
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_USAGE: u8 = 64;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "snapfeed")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Versioned snapshot acquisition with an idempotency gate")]
#[command(long_about = "snapfeed - versioned snapshot acquisition\n\n\
    Downloads one dated snapshot per day into {prefix}-{date}.csv, checks it for a\n\
    required substring, seals it as {prefix}-{date}.csv.gz and points {prefix}.csv.gz\n\
    at it. Downstream tools run only when that pointer moved since their last\n\
    successful run.\n\n\
    Examples:\n\
      snapfeed fetch https://example.org/RKI_COVID19.csv data/rki cases 2021/03/01\n\
      snapfeed gate data/rki cases -- rki_diff {snapshot} {date}\n\
      snapfeed run https://example.org/RKI_COVID19.csv data/rki cases -- to_influx {snapshot}\n\
      snapfeed status data/rki cases")]
struct Cli {
    /// Print the outcome as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, validate and seal the snapshot of one day
    Fetch {
        #[command(flatten)]
        acquire: AcquireArgs,
    },
    /// Run a downstream command if the current snapshot was not processed yet
    Gate {
        #[command(flatten)]
        dataset: DatasetArgs,

        #[command(flatten)]
        gate: GateArgs,
    },
    /// Fetch the snapshot of one day, then gate a downstream command on it
    Run {
        #[command(flatten)]
        acquire: AcquireArgs,

        #[command(flatten)]
        gate: GateArgs,
    },
    /// Show sealed history, pointer and marker of a dataset
    Status {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Marker file [default: DIR/PREFIX.marker]
        #[arg(long, value_name = "FILE")]
        marker: Option<PathBuf>,
    },
}

#[derive(Args)]
struct AcquireArgs {
    /// URL (http, https, file) or local path of the dataset
    #[arg(value_name = "SOURCE")]
    source: SourceDescriptor,

    #[command(flatten)]
    dataset: DatasetArgs,

    /// Payloads not containing this string are quarantined
    #[arg(value_name = "REQUIRED")]
    required: Option<String>,

    /// Snapshot date [default: today]
    #[arg(long, value_name = "YYYY-MM-DD")]
    date: Option<NaiveDate>,

    /// Keep the raw file after sealing
    #[arg(long)]
    keep_raw: bool,
}

#[derive(Args)]
struct DatasetArgs {
    /// Dataset directory
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// Dataset prefix, e.g. `cases`
    #[arg(value_name = "PREFIX")]
    prefix: String,

    /// Raw file extension
    #[arg(long = "ext", default_value = "csv", value_name = "EXT")]
    extension: String,

    /// Seal snapshots without gzip
    #[arg(long)]
    no_compress: bool,
}

impl DatasetArgs {
    fn format(&self) -> SnapshotFormat {
        SnapshotFormat::new(self.extension.clone(), !self.no_compress)
    }

    fn marker(&self, marker: Option<PathBuf>) -> PathBuf {
        marker.unwrap_or_else(|| default_marker_path(&self.dir, &self.prefix))
    }
}

#[derive(Args)]
struct GateArgs {
    /// Marker file [default: DIR/PREFIX.marker]
    #[arg(long, value_name = "FILE")]
    marker: Option<PathBuf>,

    /// Run even if the marker already records the current snapshot
    #[arg(long)]
    force: bool,

    /// Downstream program and arguments; {snapshot}, {name} and {date} are substituted
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl GateArgs {
    fn processor(&self) -> Result<CommandProcessor, DownstreamError> {
        CommandProcessor::from_command_line(&self.command, &ToolResolver::from_env())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Dropping the in-flight command removes its staging files.
    tokio::select! {
        result = execute(&cli) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{}", e);
                ExitCode::from(e.kind().exit_code() as u8)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, no partial snapshot was committed");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn execute(cli: &Cli) -> Result<(), SnapfeedError> {
    match &cli.command {
        Commands::Fetch { acquire } => {
            let pipeline = build_pipeline(acquire, None).await?;
            let outcome = pipeline.acquire(acquire.date()).await?;
            report(cli.json, &outcome, || {
                format!(
                    "{} sealed at {}, current: {}",
                    outcome.identity,
                    outcome.seal.path().display(),
                    outcome.current.as_deref().unwrap_or("none")
                )
            });
        }
        Commands::Gate { dataset, gate } => {
            let store = SnapshotStore::new(&dataset.dir, &dataset.prefix, dataset.format())?;
            let marker_gate = MarkerGate::new(
                store.pointer().clone(),
                Marker::new(dataset.marker(gate.marker.clone())),
            );
            let outcome = run_gate(&marker_gate, gate).await?;
            report(cli.json, &outcome, || describe_gate(&outcome));
        }
        Commands::Run { acquire, gate } => {
            let pipeline = build_pipeline(acquire, gate.marker.clone()).await?;
            let acquired = pipeline.acquire(acquire.date()).await?;
            let outcome = run_gate(pipeline.gate(), gate).await?;
            let summary = PipelineReport {
                acquire: acquired,
                gate: outcome,
            };
            report(cli.json, &summary, || {
                format!("{}: {}", summary.acquire.identity, describe_gate(&summary.gate))
            });
        }
        Commands::Status { dataset, marker } => {
            let store = SnapshotStore::new(&dataset.dir, &dataset.prefix, dataset.format())?;
            let marker_gate =
                MarkerGate::new(store.pointer().clone(), Marker::new(dataset.marker(marker.clone())));
            let status = StatusReport::collect(&store, &marker_gate).await?;
            report(cli.json, &status, || describe_status(&status));
        }
    }
    Ok(())
}

impl AcquireArgs {
    fn date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }
}

async fn build_pipeline(
    acquire: &AcquireArgs,
    marker: Option<PathBuf>,
) -> Result<Pipeline<SourceDescriptor>, SnapfeedError> {
    Pipeline::builder()
        .dir(acquire.dataset.dir.clone())
        .prefix(acquire.dataset.prefix.clone())
        .source(acquire.source.clone())
        .maybe_required_substring(acquire.required.clone())
        .extension(acquire.dataset.extension.clone())
        .compress(!acquire.dataset.no_compress)
        .keep_raw(acquire.keep_raw)
        .marker(acquire.dataset.marker(marker))
        .build()
        .await
}

async fn run_gate(
    marker_gate: &MarkerGate,
    gate: &GateArgs,
) -> Result<GateOutcome, SnapfeedError> {
    // An unusable command line surfaces as a downstream failure, leaving the marker as is.
    let processor = gate.processor();
    let downstream = move |snapshot: ResolvedSnapshot| async move {
        match processor {
            Ok(processor) => processor.process(&snapshot).await,
            Err(e) => Err(e),
        }
    };
    let outcome = if gate.force {
        marker_gate.run_forced(downstream).await?
    } else {
        marker_gate.run_if_changed(downstream).await?
    };
    Ok(outcome)
}

fn describe_gate(outcome: &GateOutcome) -> String {
    match outcome {
        GateOutcome::Skipped { current, marker } => format!(
            "{} already processed (delete {} to force)",
            current,
            marker.display()
        ),
        GateOutcome::Ran { previous, current } => format!(
            "processed {} (previously {})",
            current,
            previous.as_deref().unwrap_or("none")
        ),
    }
}

fn describe_status(status: &StatusReport) -> String {
    let mut lines = vec![format!("prefix:  {}", status.prefix)];
    lines.push(format!("sealed:  {} snapshot(s)", status.history.len()));
    if let (Some(first), Some(last)) = (status.history.first(), status.history.last()) {
        lines.push(format!("range:   {} .. {}", first, last));
    }
    lines.push(format!(
        "current: {}",
        status.current.as_deref().unwrap_or("none")
    ));
    lines.push(format!(
        "marker:  {}",
        status.marker.value().unwrap_or("none")
    ));
    if let Some(gate) = &status.gate {
        lines.push(format!("pending: {}", gate.needs_run()));
    }
    lines.join("\n")
}

fn report<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) {
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => error!("Could not serialize report: {}", e),
        }
    } else {
        println!("{}", text());
    }
}
