//! Helpers for running the simulator with stdout captured to a file.

use std::ffi::OsString;
use std::fs::File;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::JobStatus;
use crate::error::BatchError;

/// Check that `path` names an existing executable file.
pub fn check_executable(path: &Path) -> Result<(), BatchError> {
    if path.as_os_str().is_empty() {
        return Err(BatchError::configuration("simulator is not set"));
    }
    let metadata = std::fs::metadata(path).map_err(|err| {
        BatchError::configuration(format!("simulator {}: {err}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(BatchError::configuration(format!(
            "simulator {} is not a file",
            path.display()
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(BatchError::configuration(format!(
                "simulator {} is not executable",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Run `program` with `args`, writing its stdout to `stdout_path`.
///
/// The file is truncated before the process starts. Stdin and stderr are
/// null. With a `timeout`, the process is killed once it elapses and the
/// result is [`JobStatus::TimedOut`].
///
/// Errors mean the process never started (or could not be waited on).
#[instrument(skip_all, fields(program = %program.display(), stdout = %stdout_path.display()))]
pub fn run_to_file(
    program: &Path,
    args: &[OsString],
    stdout_path: &Path,
    timeout: Option<Duration>,
) -> Result<JobStatus> {
    let stdout = File::create(stdout_path)
        .with_context(|| format!("create output {}", stdout_path.display()))?;

    debug!("spawning simulator");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn {}", program.display()))?;

    let status = match timeout {
        Some(timeout) => match child.wait_timeout(timeout).context("wait for simulator")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = timeout.as_secs(), "simulator timed out, killing");
                child.kill().context("kill simulator")?;
                child.wait().context("wait simulator after kill")?;
                return Ok(JobStatus::TimedOut);
            }
        },
        None => child.wait().context("wait for simulator")?,
    };

    debug!(exit_code = ?status.code(), "simulator finished");
    Ok(status_from_exit(status))
}

fn status_from_exit(status: ExitStatus) -> JobStatus {
    match status.code() {
        Some(code) => JobStatus::Exited { code },
        None => JobStatus::Signaled,
    }
}
