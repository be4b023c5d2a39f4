//! Test-only helpers: scripted simulators and scratch batch layouts.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{JobDescriptor, JobStatus};
use crate::io::config::BatchConfig;
use crate::io::simulator::Simulator;

pub const TRACE_SUFFIX: &str = ".champsimtrace.xz";

/// Final-statistics line carrying `ipc`, as the simulator prints it.
pub fn ipc_output(ipc: &str) -> String {
    format!("CPU 0 cumulative IPC: {ipc} instructions: 500000000 cycles: 500000000\n")
}

/// A descriptor whose artifact lands at `dir/<trace_id>`.
pub fn job(dir: &Path, trace_id: &str) -> JobDescriptor {
    JobDescriptor {
        trace_id: trace_id.to_string(),
        executable_path: PathBuf::from("scripted-simulator"),
        fixed_args: Vec::new(),
        output_path: dir.join(trace_id),
    }
}

/// In-process simulator with scripted per-trace behavior.
///
/// Writes `ipc_output("1.00")` unless an output is scripted. Tracks how many
/// jobs run at once and the order in which jobs started.
#[derive(Debug, Default)]
pub struct ScriptedSimulator {
    outputs: HashMap<String, String>,
    failing: HashSet<String>,
    unspawnable: HashSet<String>,
    timing_out: HashSet<String>,
    signaled: HashSet<String>,
    panicking: HashSet<String>,
    delay: Duration,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl ScriptedSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, trace_id: &str, output: String) -> Self {
        self.outputs.insert(trace_id.to_string(), output);
        self
    }

    /// Exit with code 1 after printing no statistics.
    pub fn failing(mut self, trace_id: &str) -> Self {
        self.failing.insert(trace_id.to_string());
        self
    }

    /// Fail to start.
    pub fn unspawnable(mut self, trace_id: &str) -> Self {
        self.unspawnable.insert(trace_id.to_string());
        self
    }

    /// Write the scripted output, then report a timeout kill.
    pub fn timing_out(mut self, trace_id: &str) -> Self {
        self.timing_out.insert(trace_id.to_string());
        self
    }

    /// Write the scripted output, then report death by signal.
    pub fn signaled(mut self, trace_id: &str) -> Self {
        self.signaled.insert(trace_id.to_string());
        self
    }

    /// Panic mid-job, taking its worker thread down.
    pub fn panicking(mut self, trace_id: &str) -> Self {
        self.panicking.insert(trace_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set `flag` when the `count`-th job starts.
    pub fn cancel_after(mut self, count: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((count, flag));
        self
    }

    /// Highest number of jobs observed running at once.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Trace ids in the order their jobs started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().map(|ids| ids.clone()).unwrap_or_default()
    }
}

impl Simulator for ScriptedSimulator {
    fn run(&self, job: &JobDescriptor) -> Result<JobStatus> {
        if self.unspawnable.contains(&job.trace_id) {
            return Err(anyhow!("spawn {}: no such file", job.executable_path.display()));
        }
        let started = {
            let mut ids = self
                .started
                .lock()
                .map_err(|_| anyhow!("started list poisoned"))?;
            ids.push(job.trace_id.clone());
            ids.len()
        };
        if self.panicking.contains(&job.trace_id) {
            panic!("scripted panic in {}", job.trace_id);
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if let Some((count, flag)) = &self.cancel_after
            && started >= *count
        {
            flag.store(true, Ordering::SeqCst);
        }

        thread::sleep(self.delay);
        let failing = self.failing.contains(&job.trace_id);
        let output = if failing {
            "simulation aborted\n".to_string()
        } else {
            self.outputs
                .get(&job.trace_id)
                .cloned()
                .unwrap_or_else(|| ipc_output("1.00"))
        };
        let written = fs::write(&job.output_path, output);
        self.running.fetch_sub(1, Ordering::SeqCst);
        written?;

        if self.timing_out.contains(&job.trace_id) {
            return Ok(JobStatus::TimedOut);
        }
        if self.signaled.contains(&job.trace_id) {
            return Ok(JobStatus::Signaled);
        }
        Ok(JobStatus::Exited {
            code: if failing { 1 } else { 0 },
        })
    }
}

/// Scratch layout with a trace directory and an output root.
///
/// Each trace file's content scripts the fake simulator from
/// [`write_fake_simulator`]: `ipc <value>` prints that IPC, `fail` exits 1,
/// anything else prints no statistics.
pub struct TestBatch {
    temp: TempDir,
    pub trace_dir: PathBuf,
    pub output_root: PathBuf,
}

impl TestBatch {
    pub fn new(traces: &[(&str, &str)]) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let trace_dir = temp.path().join("traces");
        let output_root = temp.path().join("results");
        fs::create_dir_all(&trace_dir)?;
        for (trace_id, script) in traces {
            fs::write(
                trace_dir.join(format!("{trace_id}{TRACE_SUFFIX}")),
                format!("{script}\n"),
            )?;
        }
        Ok(Self {
            temp,
            trace_dir,
            output_root,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Config pointing at this layout; `simulator` is left for the caller.
    pub fn config(&self) -> BatchConfig {
        BatchConfig {
            trace_dir: self.trace_dir.clone(),
            output_root: self.output_root.clone(),
            trace_suffix: TRACE_SUFFIX.to_string(),
            warmup_instructions: 1,
            simulation_instructions: 2,
            ..BatchConfig::default()
        }
    }
}

/// Write an executable shell script that behaves like the simulator.
///
/// It reads the trace named by `-traces` and acts on its first line, see
/// [`TestBatch`].
#[cfg(unix)]
pub fn write_fake_simulator(dir: &Path) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-champsim");
    let script = r#"#!/bin/sh
trace=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-traces" ]; then
    trace="$2"
  fi
  shift
done
line=$(head -n 1 "$trace")
case "$line" in
  fail*)
    echo "simulation aborted"
    exit 1
    ;;
  ipc\ *)
    echo "Heartbeat CPU 0 instructions: 10 cycles: 10 heartbeat IPC: 9.99 cumulative IPC: 9.99"
    echo "CPU 0 cumulative IPC: ${line#ipc } instructions: 500000000 cycles: 500000000"
    ;;
  *)
    echo "no statistics"
    ;;
esac
"#;
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}
