//! One `run` of an experiment: pre-flight, dispatch, summary, merge.
//!
//! Pre-flight failures (bad config, missing simulator, no traces, unknown
//! resume prefix) abort before any job starts. After dispatch the summary is
//! written first, then the records of executed jobs are merged into the store
//! under its lock. Jobs that never executed contribute nothing to the store.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::store::MergeSummary;
use crate::dispatch::{DispatchOptions, DispatchReport, dispatch};
use crate::exit_codes;
use crate::io::config::{BatchConfig, ExperimentId, ExperimentPaths};
use crate::io::process::check_executable;
use crate::io::simulator::{ProcessSimulator, Simulator};
use crate::io::store_file::merge_into_store;
use crate::io::summary::{BatchSummary, SummaryInput, write_summary};
use crate::io::traces::{Invocation, JobEnumerator, discover_traces};

#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub config: &'a BatchConfig,
    pub experiment: &'a ExperimentId,
    /// Start at the first trace id beginning with this prefix.
    pub resume_prefix: Option<&'a str>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub paths: ExperimentPaths,
    pub dispatch: DispatchReport,
    pub merge: MergeSummary,
    pub summary: BatchSummary,
    /// The summary file could not be written; the run itself is unaffected.
    pub summary_written: bool,
}

impl BatchOutcome {
    /// [`exit_codes::INCOMPLETE`] if any job failed to execute.
    pub fn exit_code(&self) -> i32 {
        if self.dispatch.all_executed() {
            exit_codes::OK
        } else {
            exit_codes::INCOMPLETE
        }
    }
}

/// Run a batch with the simulator process named in the config.
pub fn run_batch(request: &BatchRequest<'_>, cancel: &AtomicBool) -> Result<BatchOutcome> {
    let simulator = ProcessSimulator::new(request.config.job_timeout_secs.map(Duration::from_secs));
    run_batch_with(request, &simulator, cancel)
}

#[instrument(skip_all, fields(experiment = %request.experiment, metric = %request.config.metric))]
pub fn run_batch_with<S: Simulator>(
    request: &BatchRequest<'_>,
    simulator: &S,
    cancel: &AtomicBool,
) -> Result<BatchOutcome> {
    let config = request.config;
    config.validate()?;
    check_executable(&config.simulator)?;
    let traces = discover_traces(&config.trace_dir, &config.trace_suffix)?;

    let paths = ExperimentPaths::new(&config.output_root, request.experiment, config.metric);
    let invocation = Invocation {
        executable: config.simulator.clone(),
        warmup_instructions: config.warmup_instructions,
        simulation_instructions: config.simulation_instructions,
    };
    let enumerator = JobEnumerator::new(
        traces,
        request.resume_prefix,
        invocation,
        paths.artifacts_dir.clone(),
    )?;
    info!(
        jobs = enumerator.len(),
        skipped = enumerator.skipped(),
        workers = config.workers,
        "starting batch"
    );

    let started_at = Utc::now();
    let options = DispatchOptions {
        workers: config.workers,
        metric: config.metric,
    };
    let report = dispatch(enumerator.jobs(), simulator, &options, cancel)?;
    let finished_at = Utc::now();

    let records = report.records();
    let summary = BatchSummary::build(
        &SummaryInput {
            experiment: request.experiment,
            metric: config.metric,
            workers: config.workers,
            resume_prefix: request.resume_prefix,
            skipped: enumerator.skipped(),
            started_at,
            finished_at,
            cancelled: report.cancelled,
        },
        &report.outcomes(),
        &records,
    );
    let summary_written = match write_summary(&paths.summary_path, &summary) {
        Ok(()) => true,
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(path = %paths.summary_path.display(), err = %reason, "failed to write batch summary");
            false
        }
    };

    let merge = merge_into_store(&paths.store_path, &paths.lock_path, &records)?;
    info!(
        succeeded = summary.counts.succeeded,
        failed = summary.counts.failed,
        not_executed = summary.counts.not_executed,
        cancelled = report.cancelled,
        "batch finished"
    );
    Ok(BatchOutcome {
        paths,
        dispatch: report,
        merge,
        summary,
        summary_written,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use crate::test_support::{ScriptedSimulator, TestBatch, ipc_output};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn experiment() -> ExperimentId {
        ExperimentId::new("pref_l1", "berti", "exp1").expect("id")
    }

    fn config(batch: &TestBatch, workers: usize) -> BatchConfig {
        BatchConfig {
            simulator: PathBuf::from("/bin/sh"),
            workers,
            ..batch.config()
        }
    }

    #[test]
    fn concrete_scenario_writes_sorted_store() {
        let batch = TestBatch::new(&[("401.bzip2", ""), ("429.mcf", "")]).expect("batch");
        let config = config(&batch, 2);
        let id = experiment();
        let simulator = ScriptedSimulator::new()
            .with_output("401.bzip2", ipc_output("1.23"))
            .with_output("429.mcf", ipc_output("0.87"));
        let request = BatchRequest {
            config: &config,
            experiment: &id,
            resume_prefix: None,
        };

        let outcome =
            run_batch_with(&request, &simulator, &AtomicBool::new(false)).expect("run");
        assert_eq!(outcome.exit_code(), exit_codes::OK);
        assert_eq!(
            fs::read_to_string(&outcome.paths.store_path).expect("store"),
            "401.bzip2: 1.23\n429.mcf: 0.87\n"
        );
        assert!(outcome.summary_written);
        assert!(outcome.paths.summary_path.is_file());
        assert!(outcome.paths.artifacts_dir.join("401.bzip2").is_file());
        assert!(!outcome.paths.lock_path.exists());
    }

    #[test]
    fn failed_job_records_empty_value_and_exits_ok() {
        let batch = TestBatch::new(&[("A", ""), ("B", ""), ("C", ""), ("D", "")]).expect("batch");
        let config = config(&batch, 2);
        let id = experiment();
        let simulator = ScriptedSimulator::new().failing("B");
        let request = BatchRequest {
            config: &config,
            experiment: &id,
            resume_prefix: None,
        };

        let outcome =
            run_batch_with(&request, &simulator, &AtomicBool::new(false)).expect("run");
        assert_eq!(outcome.exit_code(), exit_codes::OK);
        assert_eq!(outcome.summary.counts.failed, 1);
        assert_eq!(
            fs::read_to_string(&outcome.paths.store_path).expect("store"),
            "A: 1.00\nB: \nC: 1.00\nD: 1.00\n"
        );
    }

    #[test]
    fn rerun_fills_but_never_overwrites() {
        let batch = TestBatch::new(&[("A", ""), ("B", "")]).expect("batch");
        let config = config(&batch, 1);
        let id = experiment();
        let request = BatchRequest {
            config: &config,
            experiment: &id,
            resume_prefix: None,
        };

        let first = ScriptedSimulator::new().failing("B");
        run_batch_with(&request, &first, &AtomicBool::new(false)).expect("first");
        let second = ScriptedSimulator::new()
            .with_output("A", ipc_output("9.99"))
            .with_output("B", ipc_output("0.50"));
        let outcome = run_batch_with(&request, &second, &AtomicBool::new(false)).expect("second");

        assert_eq!(outcome.merge.filled, 1);
        assert_eq!(outcome.merge.kept, 1);
        assert_eq!(
            fs::read_to_string(&outcome.paths.store_path).expect("store"),
            "A: 1.00\nB: 0.50\n"
        );
    }

    #[test]
    fn resume_runs_only_from_prefix() {
        let batch = TestBatch::new(&[("A", ""), ("B", ""), ("C", ""), ("D", "")]).expect("batch");
        let config = config(&batch, 1);
        let id = experiment();
        let simulator = ScriptedSimulator::new();
        let request = BatchRequest {
            config: &config,
            experiment: &id,
            resume_prefix: Some("C"),
        };

        let outcome =
            run_batch_with(&request, &simulator, &AtomicBool::new(false)).expect("run");
        assert_eq!(simulator.started(), vec!["C", "D"]);
        assert_eq!(outcome.summary.skipped, 2);
        assert_eq!(
            fs::read_to_string(&outcome.paths.store_path).expect("store"),
            "C: 1.00\nD: 1.00\n"
        );
    }

    #[test]
    fn unknown_resume_prefix_starts_nothing() {
        let batch = TestBatch::new(&[("A", ""), ("B", "")]).expect("batch");
        let config = config(&batch, 1);
        let id = experiment();
        let simulator = ScriptedSimulator::new();
        let request = BatchRequest {
            config: &config,
            experiment: &id,
            resume_prefix: Some("Z"),
        };

        let err = run_batch_with(&request, &simulator, &AtomicBool::new(false))
            .expect_err("bad prefix");
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::ResumeKeyNotFound { .. })
        ));
        assert!(simulator.started().is_empty());
        assert!(!batch.output_root.exists());
    }

    #[test]
    fn missing_simulator_is_preflight_failure() {
        let batch = TestBatch::new(&[("A", "")]).expect("batch");
        let config = BatchConfig {
            simulator: batch.path().join("no-such-simulator"),
            ..batch.config()
        };
        let id = experiment();
        let request = BatchRequest {
            config: &config,
            experiment: &id,
            resume_prefix: None,
        };
        let err = run_batch_with(&request, &ScriptedSimulator::new(), &AtomicBool::new(false))
            .expect_err("missing simulator");
        assert_eq!(crate::error::exit_code_for(&err), exit_codes::INVALID);
    }

    #[test]
    fn cancellation_merges_finished_jobs_and_reports_incomplete() {
        let batch = TestBatch::new(&[("A", ""), ("B", ""), ("C", ""), ("D", "")]).expect("batch");
        let config = config(&batch, 1);
        let id = experiment();
        let cancel = Arc::new(AtomicBool::new(false));
        let simulator = ScriptedSimulator::new().cancel_after(2, Arc::clone(&cancel));
        let request = BatchRequest {
            config: &config,
            experiment: &id,
            resume_prefix: None,
        };

        let outcome = run_batch_with(&request, &simulator, &cancel).expect("run");
        assert!(cancel.load(Ordering::SeqCst));
        assert!(outcome.dispatch.cancelled);
        assert_eq!(outcome.exit_code(), exit_codes::INCOMPLETE);
        assert_eq!(outcome.summary.counts.not_executed, 2);
        assert_eq!(
            fs::read_to_string(&outcome.paths.store_path).expect("store"),
            "A: 1.00\nB: 1.00\n"
        );
    }

    #[test]
    fn held_lock_fails_merge_after_dispatch() {
        let batch = TestBatch::new(&[("A", "")]).expect("batch");
        let config = config(&batch, 1);
        let id = experiment();
        let paths = ExperimentPaths::new(&config.output_root, &id, config.metric);
        fs::create_dir_all(&paths.artifacts_dir).expect("dirs");
        fs::write(&paths.lock_path, "pid 1\n").expect("lock");
        let request = BatchRequest {
            config: &config,
            experiment: &id,
            resume_prefix: None,
        };

        let err = run_batch_with(&request, &ScriptedSimulator::new(), &AtomicBool::new(false))
            .expect_err("locked");
        assert_eq!(crate::error::exit_code_for(&err), exit_codes::STORE_FAILED);
        assert!(!paths.store_path.exists());
        // The summary is still written for the jobs that ran.
        assert!(paths.summary_path.is_file());
    }
}
