//! Simulator abstraction for job execution.
//!
//! The [`Simulator`] trait decouples dispatch from the actual executable.
//! Tests use scripted simulators that write canned output without spawning
//! processes.

use std::time::Duration;

use anyhow::Result;
use tracing::instrument;

use crate::core::types::{JobDescriptor, JobStatus};
use crate::io::process::run_to_file;

/// Runs one job to completion.
///
/// Implementations must write the job's output to `job.output_path`,
/// replacing any previous content. `Err` means the job could not be started;
/// a job that ran and failed is `Ok` with a non-success status.
pub trait Simulator: Sync {
    fn run(&self, job: &JobDescriptor) -> Result<JobStatus>;
}

/// Simulator that spawns `job.executable_path` as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessSimulator {
    /// Kill the process after this long. Unlimited when `None`.
    pub timeout: Option<Duration>,
}

impl ProcessSimulator {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Simulator for ProcessSimulator {
    #[instrument(skip_all, fields(trace_id = %job.trace_id))]
    fn run(&self, job: &JobDescriptor) -> Result<JobStatus> {
        run_to_file(
            &job.executable_path,
            &job.fixed_args,
            &job.output_path,
            self.timeout,
        )
    }
}
