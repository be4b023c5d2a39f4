//! Bounded worker pool that runs jobs and extracts their metric.
//!
//! `workers` threads pull jobs from a zero-capacity channel, so a job is only
//! handed over when a worker is free and jobs reach workers in emission order.
//! Each worker runs one simulator process at a time, which bounds concurrency
//! at `workers`. After its job exits, the worker extracts the metric from the
//! artifact on disk. The coordinator joins every worker before returning and
//! accounts for every emitted job: finished, or explicitly abandoned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::{debug, info, instrument, warn};

use crate::core::extract::Metric;
use crate::core::types::{AbandonReason, JobDescriptor, JobOutcome, JobStatus, MetricRecord};
use crate::io::artifact::extract_artifact;
use crate::io::simulator::Simulator;

/// How often a blocked hand-off re-checks the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Maximum concurrent simulator processes. Treated as 1 when 0.
    pub workers: usize,
    pub metric: Metric,
}

/// Result of one job: its outcome and, if it executed, its metric record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub outcome: JobOutcome,
    pub record: Option<MetricRecord>,
}

/// Reports for every emitted job, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub reports: Vec<JobReport>,
    /// The cancel flag was observed set during dispatch.
    pub cancelled: bool,
}

impl DispatchReport {
    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.reports
            .iter()
            .map(|report| report.outcome.clone())
            .collect()
    }

    /// Metric records of executed jobs.
    pub fn records(&self) -> Vec<MetricRecord> {
        self.reports
            .iter()
            .filter_map(|report| report.record.clone())
            .collect()
    }

    /// Every job produced a process exit (success or not).
    pub fn all_executed(&self) -> bool {
        self.reports
            .iter()
            .all(|report| report.outcome.status.executed())
    }

    /// Jobs that ran but did not exit zero.
    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.reports
            .iter()
            .map(|report| &report.outcome)
            .filter(|outcome| outcome.status.executed() && !outcome.status.succeeded())
    }
}

/// Run every job with at most `options.workers` in flight.
///
/// Once `cancel` is set, jobs not yet started are recorded as abandoned and
/// never started; running jobs finish. Errors only if a worker thread cannot
/// be spawned.
#[instrument(skip_all, fields(workers = options.workers, metric = %options.metric))]
pub fn dispatch<S, I>(
    jobs: I,
    simulator: &S,
    options: &DispatchOptions,
    cancel: &AtomicBool,
) -> Result<DispatchReport>
where
    S: Simulator,
    I: IntoIterator<Item = JobDescriptor>,
{
    let workers = options.workers.max(1);
    let metric = options.metric;
    let mut emitted: Vec<JobDescriptor> = Vec::new();
    let mut slots: Vec<Option<JobReport>> = Vec::new();

    let received = thread::scope(|scope| -> Result<Vec<(usize, JobReport)>> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<(usize, JobDescriptor)>(0);
        let (report_tx, report_rx) = crossbeam_channel::unbounded::<(usize, JobReport)>();

        let mut handles = Vec::with_capacity(workers);
        for worker_idx in 0..workers {
            let rx = job_rx.clone();
            let tx = report_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("sim-worker-{worker_idx}"))
                .spawn_scoped(scope, move || {
                    for (seq, job) in rx.iter() {
                        let report = run_job(simulator, &job, metric, cancel);
                        if tx.send((seq, report)).is_err() {
                            break;
                        }
                    }
                })
                .context("spawn worker thread")?;
            handles.push(handle);
        }
        drop(job_rx);
        drop(report_tx);

        for (seq, job) in jobs.into_iter().enumerate() {
            emitted.push(job.clone());
            slots.push(None);
            if let Err(reason) = offer(&job_tx, seq, job, cancel) {
                debug!(trace_id = %emitted[seq].trace_id, ?reason, "job not started");
                slots[seq] = Some(abandoned(&emitted[seq], reason));
            }
        }
        drop(job_tx);

        for handle in handles {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        Ok(report_rx.iter().collect())
    })?;

    for (seq, report) in received {
        slots[seq] = Some(report);
    }
    let reports = slots
        .into_iter()
        .zip(&emitted)
        .map(|(slot, job)| slot.unwrap_or_else(|| abandoned(job, AbandonReason::WorkerLost)))
        .collect::<Vec<_>>();

    let report = DispatchReport {
        reports,
        cancelled: cancel.load(Ordering::SeqCst),
    };
    info!(
        jobs = report.reports.len(),
        failed = report.failed().count(),
        cancelled = report.cancelled,
        "dispatch finished"
    );
    Ok(report)
}

/// Hand `job` to the next free worker, polling `cancel` while blocked.
fn offer(
    tx: &Sender<(usize, JobDescriptor)>,
    seq: usize,
    job: JobDescriptor,
    cancel: &AtomicBool,
) -> Result<(), AbandonReason> {
    let mut item = (seq, job);
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(AbandonReason::Cancelled);
        }
        match tx.send_timeout(item, CANCEL_POLL) {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Timeout(back)) => item = back,
            Err(SendTimeoutError::Disconnected(_)) => return Err(AbandonReason::WorkerLost),
        }
    }
}

fn run_job<S: Simulator>(
    simulator: &S,
    job: &JobDescriptor,
    metric: Metric,
    cancel: &AtomicBool,
) -> JobReport {
    // The hand-off may race with cancellation.
    if cancel.load(Ordering::SeqCst) {
        return abandoned(job, AbandonReason::Cancelled);
    }
    debug!(trace_id = %job.trace_id, "job started");
    let start = Instant::now();
    let status = match simulator.run(job) {
        Ok(status) => status,
        Err(err) => JobStatus::SpawnFailed {
            error: format!("{err:#}"),
        },
    };
    let duration = start.elapsed();

    if status.succeeded() {
        debug!(trace_id = %job.trace_id, duration_secs = duration.as_secs_f64(), "job finished");
    } else {
        warn!(trace_id = %job.trace_id, status = %status, "job failed");
    }

    // A killed simulator leaves a truncated artifact; its key stays fillable.
    let record = match &status {
        JobStatus::Exited { .. } => Some(extract_artifact(&job.trace_id, &job.output_path, metric)),
        JobStatus::Signaled | JobStatus::TimedOut => Some(MetricRecord::new(&job.trace_id, None)),
        JobStatus::SpawnFailed { .. } | JobStatus::Abandoned { .. } => None,
    };
    JobReport {
        outcome: JobOutcome {
            trace_id: job.trace_id.clone(),
            status,
            output_path: job.output_path.clone(),
            duration,
        },
        record,
    }
}

fn abandoned(job: &JobDescriptor, reason: AbandonReason) -> JobReport {
    JobReport {
        outcome: JobOutcome {
            trace_id: job.trace_id.clone(),
            status: JobStatus::Abandoned { reason },
            output_path: job.output_path.clone(),
            duration: Duration::ZERO,
        },
        record: None,
    }
}
