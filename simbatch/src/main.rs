//! Simulation batch dispatcher.
//!
//! Runs the simulator over every trace with bounded concurrency and merges
//! one metric per trace into `<output_root>/<level>/<subdir>/<label>.<metric>.txt`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use simbatch::batch::{BatchRequest, run_batch};
use simbatch::collect::collect_experiment;
use simbatch::core::extract::Metric;
use simbatch::error::exit_code_for;
use simbatch::exit_codes;
use simbatch::io::config::{
    BatchConfig, ConfigOverrides, DEFAULT_CONFIG_FILE, ExperimentId, ExperimentPaths, load_config,
    write_config,
};
use simbatch::logging;

#[derive(Parser)]
#[command(
    name = "simbatch",
    version,
    about = "Run simulation batches and merge their metrics into a result store"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `simbatch.toml` if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Simulate every trace and merge the extracted metric into the store.
    Run(RunArgs),
    /// Extract the metric from existing artifacts into the store, without simulating.
    Collect(CollectArgs),
    /// List the metrics that can be extracted.
    Metrics,
}

#[derive(Args)]
struct ExperimentArgs {
    /// Experiment level, e.g. `pref_l1`.
    #[arg(long)]
    level: String,
    /// Experiment group below the level, e.g. `berti`.
    #[arg(long)]
    subdir: String,
    /// Experiment label; names the artifact directory and the store.
    #[arg(long)]
    label: String,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    output_root: Option<PathBuf>,
    #[arg(long)]
    metric: Option<Metric>,
}

impl ExperimentArgs {
    fn experiment(&self) -> Result<ExperimentId> {
        Ok(ExperimentId::new(&self.level, &self.subdir, &self.label)?)
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    experiment: ExperimentArgs,
    #[arg(long)]
    simulator: Option<PathBuf>,
    #[arg(long)]
    trace_dir: Option<PathBuf>,
    /// Maximum simulator processes running at once.
    #[arg(short = 'j', long)]
    workers: Option<usize>,
    /// Start at the first trace whose id begins with this prefix.
    #[arg(long)]
    resume_from: Option<String>,
    /// Kill a simulator process after this many seconds.
    #[arg(long)]
    job_timeout_secs: Option<u64>,
}

#[derive(Args)]
struct CollectArgs {
    #[command(flatten)]
    experiment: ExperimentArgs,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run(args) => cmd_run(&args),
        Command::Collect(args) => cmd_collect(&args),
        Command::Metrics => cmd_metrics(),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &BatchConfig::default())?;
    println!("init: wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let experiment = args.experiment.experiment()?;
    let overrides = ConfigOverrides {
        simulator: args.simulator.clone(),
        trace_dir: args.trace_dir.clone(),
        output_root: args.experiment.output_root.clone(),
        workers: args.workers,
        job_timeout_secs: args.job_timeout_secs,
        metric: args.experiment.metric,
    };
    let config = load_config(&args.experiment.config)?.apply_overrides(&overrides)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(err) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(err = %err, "failed to install Ctrl+C handler");
    }

    let outcome = run_batch(
        &BatchRequest {
            config: &config,
            experiment: &experiment,
            resume_prefix: args.resume_from.as_deref(),
        },
        &cancel,
    )?;
    let counts = outcome.summary.counts;
    println!(
        "run: experiment={} jobs={} succeeded={} failed={} not_executed={} missing_metric={}",
        experiment,
        counts.total,
        counts.succeeded,
        counts.failed,
        counts.not_executed,
        counts.missing_metric
    );
    println!(
        "store: {} (inserted={} filled={} kept={})",
        outcome.paths.store_path.display(),
        outcome.merge.inserted,
        outcome.merge.filled,
        outcome.merge.kept
    );
    if outcome.dispatch.cancelled {
        eprintln!("run: cancelled; rerun with --resume-from to continue");
    }
    Ok(outcome.exit_code())
}

fn cmd_collect(args: &CollectArgs) -> Result<i32> {
    let experiment = args.experiment.experiment()?;
    let overrides = ConfigOverrides {
        output_root: args.experiment.output_root.clone(),
        metric: args.experiment.metric,
        ..ConfigOverrides::default()
    };
    let config = load_config(&args.experiment.config)?.apply_overrides(&overrides)?;
    let paths = ExperimentPaths::new(&config.output_root, &experiment, config.metric);

    let outcome = collect_experiment(&paths, config.metric)?;
    println!(
        "collect: experiment={} artifacts={} already_resolved={} inserted={} filled={} missing={}",
        experiment,
        outcome.artifacts,
        outcome.already_resolved,
        outcome.merge.inserted,
        outcome.merge.filled,
        outcome.missing.len()
    );
    println!("store: {}", outcome.store_path.display());
    Ok(exit_codes::OK)
}

fn cmd_metrics() -> Result<i32> {
    for metric in Metric::ALL {
        println!("{:<24} {}", metric.key(), metric.description());
    }
    Ok(exit_codes::OK)
}
