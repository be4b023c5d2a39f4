//! Trace discovery and job enumeration.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::resume::resolve_resume_index;
use crate::core::store::is_valid_key;
use crate::core::types::JobDescriptor;
use crate::error::BatchError;

/// A trace input on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFile {
    /// Filename with the trace suffix stripped.
    pub trace_id: String,
    pub path: PathBuf,
}

/// List traces in `dir` whose filename ends with `suffix`, sorted by trace id.
///
/// Errors with [`BatchError::Configuration`] if the directory is missing or
/// holds no traces.
pub fn discover_traces(dir: &Path, suffix: &str) -> Result<Vec<TraceFile>> {
    if dir.as_os_str().is_empty() {
        return Err(BatchError::configuration("trace_dir is not set").into());
    }
    if !dir.is_dir() {
        return Err(BatchError::configuration(format!(
            "trace directory {} does not exist",
            dir.display()
        ))
        .into());
    }
    let mut traces = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read trace dir {}", dir.display()))? {
        let entry = entry.context("read trace entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!(path = %path.display(), "skipping trace with non-UTF-8 name");
            continue;
        };
        let Some(trace_id) = name.strip_suffix(suffix) else {
            continue;
        };
        if trace_id.is_empty() {
            continue;
        }
        if !is_valid_key(trace_id) {
            return Err(BatchError::configuration(format!(
                "trace id {trace_id:?} cannot be used as a result key (no ':' or surrounding whitespace)"
            ))
            .into());
        }
        traces.push(TraceFile {
            trace_id: trace_id.to_string(),
            path,
        });
    }
    if traces.is_empty() {
        return Err(BatchError::configuration(format!(
            "no traces ending in {suffix:?} under {}",
            dir.display()
        ))
        .into());
    }
    traces.sort_by(|left, right| left.trace_id.cmp(&right.trace_id));
    debug!(count = traces.len(), dir = %dir.display(), "traces discovered");
    Ok(traces)
}

/// Fixed part of every simulator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub executable: PathBuf,
    pub warmup_instructions: u64,
    pub simulation_instructions: u64,
}

impl Invocation {
    /// `-warmup_instructions <N> -simulation_instructions <M> -traces <path>`.
    pub fn args_for(&self, trace: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-warmup_instructions"),
            OsString::from(self.warmup_instructions.to_string()),
            OsString::from("-simulation_instructions"),
            OsString::from(self.simulation_instructions.to_string()),
            OsString::from("-traces"),
            trace.as_os_str().to_owned(),
        ]
    }
}

/// Ordered, restartable source of job descriptors.
///
/// Every call to [`JobEnumerator::jobs`] starts again at the resume point.
#[derive(Debug, Clone)]
pub struct JobEnumerator {
    traces: Vec<TraceFile>,
    start: usize,
    invocation: Invocation,
    output_dir: PathBuf,
}

impl JobEnumerator {
    /// Resolve the resume prefix and ensure `output_dir` exists.
    ///
    /// `traces` must be sorted by trace id, as returned by [`discover_traces`].
    pub fn new(
        traces: Vec<TraceFile>,
        resume_prefix: Option<&str>,
        invocation: Invocation,
        output_dir: PathBuf,
    ) -> Result<Self> {
        let start = match resume_prefix {
            Some(prefix) => {
                let ids: Vec<&str> = traces.iter().map(|t| t.trace_id.as_str()).collect();
                resolve_resume_index(&ids, prefix).ok_or_else(|| {
                    BatchError::ResumeKeyNotFound {
                        prefix: prefix.to_string(),
                    }
                })?
            }
            None => 0,
        };
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("create output dir {}", output_dir.display()))?;
        if start > 0 {
            debug!(
                skipped = start,
                resume_at = %traces[start].trace_id,
                "resuming batch"
            );
        }
        Ok(Self {
            traces,
            start,
            invocation,
            output_dir,
        })
    }

    /// Number of descriptors the sequence emits.
    pub fn len(&self) -> usize {
        self.traces.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of leading traces elided by the resume prefix.
    pub fn skipped(&self) -> usize {
        self.start
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Lazily build descriptors from the resume point onward.
    pub fn jobs(&self) -> impl Iterator<Item = JobDescriptor> + '_ {
        self.traces[self.start..]
            .iter()
            .map(|trace| JobDescriptor {
                trace_id: trace.trace_id.clone(),
                executable_path: self.invocation.executable.clone(),
                fixed_args: self.invocation.args_for(&trace.path),
                output_path: self.output_dir.join(&trace.trace_id),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUFFIX: &str = ".champsimtrace.xz";

    fn seed_traces(dir: &Path, ids: &[&str]) {
        for id in ids {
            fs::write(dir.join(format!("{id}{SUFFIX}")), b"trace").expect("trace");
        }
    }

    fn invocation() -> Invocation {
        Invocation {
            executable: PathBuf::from("/bin/champsim"),
            warmup_instructions: 10,
            simulation_instructions: 20,
        }
    }

    #[test]
    fn discovers_sorted_traces_and_ignores_other_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed_traces(temp.path(), &["429.mcf", "401.bzip2", "403.gcc"]);
        fs::write(temp.path().join("README"), b"notes").expect("readme");
        fs::write(temp.path().join(SUFFIX), b"bare suffix").expect("bare");
        fs::create_dir(temp.path().join(format!("dir{SUFFIX}"))).expect("dir");

        let traces = discover_traces(temp.path(), SUFFIX).expect("discover");
        let ids: Vec<&str> = traces.iter().map(|t| t.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["401.bzip2", "403.gcc", "429.mcf"]);
    }

    #[test]
    fn empty_trace_set_is_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = discover_traces(temp.path(), SUFFIX).expect_err("empty");
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::Configuration(_))
        ));
    }

    #[test]
    fn trace_id_with_colon_is_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed_traces(temp.path(), &["401.bzip2", "trace:1"]);
        let err = discover_traces(temp.path(), SUFFIX).expect_err("bad id");
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::Configuration(message)) if message.contains("trace:1")
        ));
    }

    #[test]
    fn resume_emits_match_and_following() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed_traces(temp.path(), &["A", "B", "C", "D"]);
        let traces = discover_traces(temp.path(), SUFFIX).expect("discover");
        let out = temp.path().join("out");

        let enumerator =
            JobEnumerator::new(traces, Some("C"), invocation(), out.clone()).expect("enum");
        let ids: Vec<String> = enumerator.jobs().map(|job| job.trace_id).collect();
        assert_eq!(ids, vec!["C", "D"]);
        assert_eq!(enumerator.skipped(), 2);
        assert_eq!(enumerator.len(), 2);
        assert!(out.is_dir());

        // Restartable: a second pass yields the same sequence.
        let again: Vec<String> = enumerator.jobs().map(|job| job.trace_id).collect();
        assert_eq!(again, ids);
    }

    #[test]
    fn unknown_resume_prefix_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed_traces(temp.path(), &["A", "B"]);
        let traces = discover_traces(temp.path(), SUFFIX).expect("discover");
        let err = JobEnumerator::new(traces, Some("Z"), invocation(), temp.path().join("out"))
            .expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::ResumeKeyNotFound { prefix }) if prefix == "Z"
        ));
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn descriptors_carry_fixed_invocation() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed_traces(temp.path(), &["401.bzip2"]);
        let traces = discover_traces(temp.path(), SUFFIX).expect("discover");
        let out = temp.path().join("out");
        let enumerator = JobEnumerator::new(traces, None, invocation(), out.clone()).expect("enum");
        let job = enumerator.jobs().next().expect("job");
        assert_eq!(job.output_path, out.join("401.bzip2"));
        let args: Vec<String> = job
            .fixed_args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-warmup_instructions".to_string(),
                "10".to_string(),
                "-simulation_instructions".to_string(),
                "20".to_string(),
                "-traces".to_string(),
                temp.path()
                    .join("401.bzip2.champsimtrace.xz")
                    .display()
                    .to_string(),
            ]
        );
    }
}
