//! Batch configuration stored in `simbatch.toml`, plus experiment identity.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::extract::Metric;
use crate::error::BatchError;
use crate::io::atomic::write_atomic;

pub const DEFAULT_CONFIG_FILE: &str = "simbatch.toml";

/// Batch configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take defaults; the
/// simulator and trace directory have none and are checked in pre-flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Simulator executable invoked once per trace.
    pub simulator: PathBuf,

    /// Directory holding the trace inputs.
    pub trace_dir: PathBuf,

    /// Filename suffix identifying traces; stripped to form the trace id.
    pub trace_suffix: String,

    /// Root under which artifacts, stores and summaries are laid out.
    pub output_root: PathBuf,

    pub warmup_instructions: u64,

    pub simulation_instructions: u64,

    /// Maximum number of simulator processes running at once.
    pub workers: usize,

    /// Kill a job after this many seconds. Unlimited when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,

    /// Metric extracted into the result store.
    pub metric: Metric,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            simulator: PathBuf::new(),
            trace_dir: PathBuf::new(),
            trace_suffix: ".champsimtrace.xz".to_string(),
            output_root: PathBuf::from("results"),
            warmup_instructions: 200_000_000,
            simulation_instructions: 500_000_000,
            workers: 1,
            job_timeout_secs: None,
            metric: Metric::Ipc,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.workers == 0 {
            return Err(BatchError::configuration("workers must be > 0"));
        }
        if self.simulation_instructions == 0 {
            return Err(BatchError::configuration(
                "simulation_instructions must be > 0",
            ));
        }
        if self.trace_suffix.is_empty() {
            return Err(BatchError::configuration("trace_suffix must be non-empty"));
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(BatchError::configuration("output_root must be non-empty"));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(BatchError::configuration("job_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Apply command-line overrides, then re-validate.
    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self, BatchError> {
        if let Some(simulator) = &overrides.simulator {
            self.simulator = simulator.clone();
        }
        if let Some(trace_dir) = &overrides.trace_dir {
            self.trace_dir = trace_dir.clone();
        }
        if let Some(output_root) = &overrides.output_root {
            self.output_root = output_root.clone();
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        if let Some(timeout) = overrides.job_timeout_secs {
            self.job_timeout_secs = Some(timeout);
        }
        if let Some(metric) = overrides.metric {
            self.metric = metric;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Values supplied on the command line that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub simulator: Option<PathBuf>,
    pub trace_dir: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub workers: Option<usize>,
    pub job_timeout_secs: Option<u64>,
    pub metric: Option<Metric>,
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BatchConfig::default()`.
pub fn load_config(path: &Path) -> Result<BatchConfig> {
    if !path.exists() {
        let cfg = BatchConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BatchConfig = toml::from_str(&contents)
        .map_err(|err| BatchError::configuration(format!("parse {}: {err}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BatchConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
        .with_context(|| format!("write config {}", path.display()))
}

/// Identity of one experiment: `(level, subdir, label)`.
///
/// Each identity (per metric) owns exactly one result store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentId {
    pub level: String,
    pub subdir: String,
    pub label: String,
}

impl ExperimentId {
    pub fn new(
        level: impl Into<String>,
        subdir: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<Self, BatchError> {
        let id = Self {
            level: level.into(),
            subdir: subdir.into(),
            label: label.into(),
        };
        validate_component("level", &id.level)?;
        validate_component("subdir", &id.subdir)?;
        validate_component("label", &id.label)?;
        Ok(id)
    }
}

impl std::fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.subdir, self.label)
    }
}

fn validate_component(name: &str, value: &str) -> Result<(), BatchError> {
    if value.trim().is_empty() {
        return Err(BatchError::configuration(format!("{name} must be non-empty")));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(BatchError::configuration(format!(
            "{name} must not contain path separators"
        )));
    }
    if value == "." || value.contains("..") {
        return Err(BatchError::configuration(format!(
            "{name} must not contain '..' or be '.'"
        )));
    }
    Ok(())
}

/// All canonical paths for one experiment identity and metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentPaths {
    /// Directory receiving one artifact per trace.
    pub artifacts_dir: PathBuf,
    pub store_path: PathBuf,
    pub lock_path: PathBuf,
    pub summary_path: PathBuf,
}

impl ExperimentPaths {
    pub fn new(output_root: &Path, id: &ExperimentId, metric: Metric) -> Self {
        let group_dir = output_root.join(&id.level).join(&id.subdir);
        let store_path = group_dir.join(format!("{}.{}.txt", id.label, metric.key()));
        let mut lock_name = store_path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            artifacts_dir: group_dir.join(&id.label),
            lock_path: PathBuf::from(lock_name),
            summary_path: group_dir.join(format!("{}.summary.json", id.label)),
            store_path,
        }
    }
}
