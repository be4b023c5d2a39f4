//! Batch summary persisted next to the result store.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::extract::Metric;
use crate::core::types::{JobOutcome, JobStatus, MetricRecord};
use crate::io::atomic::write_atomic;
use crate::io::config::ExperimentId;

/// Machine-readable record of one `run`, persisted to `<label>.summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub experiment: ExperimentId,
    pub metric: Metric,
    pub workers: usize,
    pub resume_prefix: Option<String>,
    /// Traces elided by the resume prefix.
    pub skipped: usize,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub cancelled: bool,
    pub counts: JobCounts,
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounts {
    pub total: usize,
    pub succeeded: usize,
    /// Ran but exited non-zero, was signaled or timed out.
    pub failed: usize,
    /// Never produced a process exit (spawn failure or abandoned).
    pub not_executed: usize,
    /// Executed jobs with no extractable metric.
    pub missing_metric: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEntry {
    pub trace_id: String,
    #[serde(flatten)]
    pub status: JobStatus,
    pub duration_secs: f64,
    pub value: Option<String>,
}

/// Inputs for [`BatchSummary::build`].
#[derive(Debug)]
pub struct SummaryInput<'a> {
    pub experiment: &'a ExperimentId,
    pub metric: Metric,
    pub workers: usize,
    pub resume_prefix: Option<&'a str>,
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl BatchSummary {
    /// `records` holds one entry per executed job, matched by key.
    pub fn build(input: &SummaryInput<'_>, outcomes: &[JobOutcome], records: &[MetricRecord]) -> Self {
        let mut counts = JobCounts {
            total: outcomes.len(),
            ..JobCounts::default()
        };
        let values: HashMap<&str, Option<&str>> = records
            .iter()
            .map(|record| (record.key.as_str(), record.value.as_deref()))
            .collect();
        let mut jobs = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let value = values
                .get(outcome.trace_id.as_str())
                .copied()
                .flatten()
                .map(str::to_string);
            if outcome.status.succeeded() {
                counts.succeeded += 1;
            } else if outcome.status.executed() {
                counts.failed += 1;
            } else {
                counts.not_executed += 1;
            }
            if outcome.status.executed() && value.is_none() {
                counts.missing_metric += 1;
            }
            jobs.push(JobEntry {
                trace_id: outcome.trace_id.clone(),
                status: outcome.status.clone(),
                duration_secs: outcome.duration.as_secs_f64(),
                value,
            });
        }
        let duration = input.finished_at - input.started_at;
        Self {
            experiment: input.experiment.clone(),
            metric: input.metric,
            workers: input.workers,
            resume_prefix: input.resume_prefix.map(str::to_string),
            skipped: input.skipped,
            start_time: input.started_at.to_rfc3339(),
            end_time: input.finished_at.to_rfc3339(),
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            cancelled: input.cancelled,
            counts,
            jobs,
        }
    }
}

/// Atomically write the summary as pretty JSON with a trailing newline.
pub fn write_summary(path: &Path, summary: &BatchSummary) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(summary).context("serialize summary")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes()).with_context(|| format!("write summary {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AbandonReason;
    use std::path::PathBuf;
    use std::time::Duration;

    fn outcome(id: &str, status: JobStatus) -> JobOutcome {
        JobOutcome {
            trace_id: id.to_string(),
            status,
            output_path: PathBuf::from(id),
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn counts_classify_outcomes() {
        let experiment = ExperimentId::new("l1", "berti", "exp1").expect("id");
        let now = Utc::now();
        let input = SummaryInput {
            experiment: &experiment,
            metric: Metric::Ipc,
            workers: 2,
            resume_prefix: Some("4"),
            skipped: 1,
            started_at: now,
            finished_at: now,
            cancelled: true,
        };
        let outcomes = vec![
            outcome("a", JobStatus::Exited { code: 0 }),
            outcome("b", JobStatus::Exited { code: 1 }),
            outcome(
                "c",
                JobStatus::Abandoned {
                    reason: AbandonReason::Cancelled,
                },
            ),
        ];
        let records = vec![
            MetricRecord::new("a", Some("1.0".to_string())),
            MetricRecord::new("b", None),
        ];
        let summary = BatchSummary::build(&input, &outcomes, &records);
        assert_eq!(
            summary.counts,
            JobCounts {
                total: 3,
                succeeded: 1,
                failed: 1,
                not_executed: 1,
                missing_metric: 1,
            }
        );
        assert_eq!(summary.jobs[0].value.as_deref(), Some("1.0"));
        assert_eq!(summary.jobs[0].duration_secs, 1.5);
        assert!(summary.cancelled);
    }

    #[test]
    fn values_match_outcomes_by_key() {
        let experiment = ExperimentId::new("l1", "berti", "exp1").expect("id");
        let now = Utc::now();
        let input = SummaryInput {
            experiment: &experiment,
            metric: Metric::Ipc,
            workers: 4,
            resume_prefix: None,
            skipped: 0,
            started_at: now,
            finished_at: now,
            cancelled: false,
        };
        let outcomes: Vec<JobOutcome> = (0..50)
            .map(|n| outcome(&format!("t{n:02}"), JobStatus::Exited { code: 0 }))
            .collect();
        let records: Vec<MetricRecord> = (0..50)
            .rev()
            .map(|n| MetricRecord::new(format!("t{n:02}"), Some(format!("{n}.5"))))
            .collect();
        let summary = BatchSummary::build(&input, &outcomes, &records);
        for (n, job) in summary.jobs.iter().enumerate() {
            assert_eq!(job.trace_id, format!("t{n:02}"));
            assert_eq!(job.value, Some(format!("{n}.5")));
        }
        assert_eq!(summary.counts.missing_metric, 0);
    }

    #[test]
    fn writes_pretty_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let experiment = ExperimentId::new("l1", "berti", "exp1").expect("id");
        let now = Utc::now();
        let input = SummaryInput {
            experiment: &experiment,
            metric: Metric::Ipc,
            workers: 1,
            resume_prefix: None,
            skipped: 0,
            started_at: now,
            finished_at: now,
            cancelled: false,
        };
        let summary = BatchSummary::build(
            &input,
            &[outcome("a", JobStatus::Exited { code: 0 })],
            &[],
        );
        let path = temp.path().join("exp1.summary.json");
        write_summary(&path, &summary).expect("write");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.ends_with("}\n"));
        let loaded: BatchSummary = serde_json::from_str(&contents).expect("parse");
        assert_eq!(loaded, summary);
        assert!(contents.contains("\"status\": \"exited\""));
    }
}
