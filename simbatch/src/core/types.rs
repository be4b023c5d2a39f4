//! Shared deterministic types for batch orchestration.
//!
//! These types are the contracts between the enumerator, the dispatcher, the
//! extractor and the store merger. They carry no I/O handles.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One simulation unit: run the simulator on a single trace and capture stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Trace filename without the trace suffix. Also the result store key.
    pub trace_id: String,
    /// Simulator executable.
    pub executable_path: PathBuf,
    /// Ordered argument list, including the trace path.
    pub fixed_args: Vec<OsString>,
    /// File that receives the simulator's stdout (truncated on start).
    pub output_path: PathBuf,
}

/// Why a job never produced an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// The batch was cancelled before the job started.
    Cancelled,
    /// The worker holding the job died without reporting back.
    WorkerLost,
}

/// Terminal status of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// The simulator exited on its own.
    Exited { code: i32 },
    /// The simulator was terminated by a signal.
    Signaled,
    /// The simulator exceeded the job timeout and was killed.
    TimedOut,
    /// The simulator could not be started.
    SpawnFailed { error: String },
    /// The job was never run to a known status.
    Abandoned { reason: AbandonReason },
}

impl JobStatus {
    /// The simulator process ran (whatever its exit status).
    pub fn executed(&self) -> bool {
        matches!(
            self,
            JobStatus::Exited { .. } | JobStatus::Signaled | JobStatus::TimedOut
        )
    }

    /// The simulator ran and exited with status zero.
    pub fn succeeded(&self) -> bool {
        matches!(self, JobStatus::Exited { code: 0 })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            JobStatus::Exited { code } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Exited { code } => write!(f, "exited with code {code}"),
            JobStatus::Signaled => write!(f, "terminated by signal"),
            JobStatus::TimedOut => write!(f, "timed out"),
            JobStatus::SpawnFailed { error } => write!(f, "failed to spawn: {error}"),
            JobStatus::Abandoned { reason } => match reason {
                AbandonReason::Cancelled => write!(f, "abandoned: batch cancelled"),
                AbandonReason::WorkerLost => write!(f, "abandoned: worker lost"),
            },
        }
    }
}

/// Completion record for one dispatched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub trace_id: String,
    pub status: JobStatus,
    pub output_path: PathBuf,
    /// Wall-clock time spent on the job; zero when it never started.
    pub duration: Duration,
}

/// A freshly extracted metric for one trace.
///
/// `value` is `None` when the artifact had no well-formed marker line. The
/// key is still meaningful: it marks the trace as attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub key: String,
    pub value: Option<String>,
}

impl MetricRecord {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}
