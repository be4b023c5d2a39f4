//! Reading job output artifacts.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::extract::{Metric, extract_metric};
use crate::core::store::is_valid_key;
use crate::core::types::MetricRecord;

/// Extract `metric` from one artifact.
///
/// Never fails: an unreadable artifact or a missing marker line yields a
/// record with no value, so one bad output cannot abort an extraction pass.
pub fn extract_artifact(key: &str, path: &Path, metric: Metric) -> MetricRecord {
    let lines = match read_lines(path) {
        Ok(lines) => lines,
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(trace_id = key, err = %reason, "cannot read artifact");
            return MetricRecord::new(key, None);
        }
    };
    let value = extract_metric(metric, lines.iter().map(String::as_str));
    if value.is_none() {
        warn!(trace_id = key, metric = %metric, "no metric in artifact");
    } else {
        debug!(trace_id = key, metric = %metric, value = ?value, "metric extracted");
    }
    MetricRecord::new(key, value)
}

// Simulator output may contain stray non-UTF-8 bytes; decode lossily per line.
fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
    Ok(lines)
}

/// An artifact found on disk, keyed by its filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub path: PathBuf,
}

/// List artifacts in `dir`, sorted by key.
///
/// Hidden files, leftover `.tmp` files and names that cannot be store keys
/// are skipped.
pub fn list_artifacts(dir: &Path) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read artifact entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!(path = %path.display(), "skipping artifact with non-UTF-8 name");
            continue;
        };
        if name.starts_with('.') || name.ends_with(".tmp") {
            continue;
        }
        if !is_valid_key(name) {
            warn!(path = %path.display(), "skipping artifact whose name cannot be a result key");
            continue;
        }
        artifacts.push(Artifact {
            key: name.to_string(),
            path,
        });
    }
    artifacts.sort_by(|left, right| left.key.cmp(&right.key));
    Ok(artifacts)
}
