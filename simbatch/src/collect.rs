//! Extraction-only pass over existing artifacts.
//!
//! Lists the experiment's artifact directory, extracts the metric from every
//! artifact whose key is not yet resolved in the store, and merges the
//! records. Keys that already hold a value are skipped: the merge rule would
//! keep them anyway.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::extract::Metric;
use crate::core::store::MergeSummary;
use crate::error::BatchError;
use crate::io::artifact::{extract_artifact, list_artifacts};
use crate::io::config::ExperimentPaths;
use crate::io::store_file::StoreSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOutcome {
    pub store_path: PathBuf,
    /// Artifacts found on disk.
    pub artifacts: usize,
    /// Artifacts skipped because their key already has a value.
    pub already_resolved: usize,
    /// Keys extracted without a value.
    pub missing: Vec<String>,
    pub merge: MergeSummary,
}

#[instrument(skip_all, fields(artifacts_dir = %paths.artifacts_dir.display(), metric = %metric))]
pub fn collect_experiment(paths: &ExperimentPaths, metric: Metric) -> Result<CollectOutcome> {
    if !paths.artifacts_dir.is_dir() {
        return Err(BatchError::configuration(format!(
            "artifact directory {} does not exist",
            paths.artifacts_dir.display()
        ))
        .into());
    }
    let artifacts = list_artifacts(&paths.artifacts_dir)?;
    let session = StoreSession::open(&paths.store_path, &paths.lock_path)?;

    let mut records = Vec::new();
    let mut already_resolved = 0usize;
    for artifact in &artifacts {
        if session.store().is_resolved(&artifact.key) {
            already_resolved += 1;
            continue;
        }
        records.push(extract_artifact(&artifact.key, &artifact.path, metric));
    }
    debug!(
        artifacts = artifacts.len(),
        already_resolved,
        extracting = records.len(),
        "artifacts scanned"
    );
    let missing = records
        .iter()
        .filter(|record| record.value.is_none())
        .map(|record| record.key.clone())
        .collect();

    let merge = session.commit(&records)?;
    info!(
        inserted = merge.inserted,
        filled = merge.filled,
        already_resolved,
        "collect finished"
    );
    Ok(CollectOutcome {
        store_path: paths.store_path.clone(),
        artifacts: artifacts.len(),
        already_resolved,
        missing,
        merge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::ExperimentId;
    use crate::test_support::ipc_output;
    use std::fs;

    fn setup(temp: &std::path::Path) -> ExperimentPaths {
        let id = ExperimentId::new("pref_l1", "berti", "exp1").expect("id");
        let paths = ExperimentPaths::new(&temp.join("results"), &id, Metric::Ipc);
        fs::create_dir_all(&paths.artifacts_dir).expect("artifacts dir");
        paths
    }

    #[test]
    fn collects_concrete_scenario() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = setup(temp.path());
        fs::write(paths.artifacts_dir.join("401.bzip2"), ipc_output("1.23")).expect("a");
        fs::write(paths.artifacts_dir.join("429.mcf"), ipc_output("0.87")).expect("b");

        let outcome = collect_experiment(&paths, Metric::Ipc).expect("collect");
        assert_eq!(outcome.artifacts, 2);
        assert_eq!(outcome.merge.inserted, 2);
        assert_eq!(
            fs::read_to_string(&paths.store_path).expect("read"),
            "401.bzip2: 1.23\n429.mcf: 0.87\n"
        );
    }

    #[test]
    fn skips_resolved_and_fills_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = setup(temp.path());
        fs::write(&paths.store_path, "401.bzip2: 1.23\n429.mcf: \n").expect("store");
        // Regenerated artifact with a different value must not change the store.
        fs::write(paths.artifacts_dir.join("401.bzip2"), ipc_output("2.00")).expect("a");
        fs::write(paths.artifacts_dir.join("429.mcf"), ipc_output("0.87")).expect("b");
        fs::write(paths.artifacts_dir.join("403.gcc"), "segmentation fault\n").expect("c");

        let outcome = collect_experiment(&paths, Metric::Ipc).expect("collect");
        assert_eq!(outcome.already_resolved, 1);
        assert_eq!(outcome.missing, vec!["403.gcc".to_string()]);
        assert_eq!(outcome.merge.filled, 1);
        assert_eq!(outcome.merge.inserted, 1);
        assert_eq!(
            fs::read_to_string(&paths.store_path).expect("read"),
            "401.bzip2: 1.23\n403.gcc: \n429.mcf: 0.87\n"
        );

        // A second pass over unchanged artifacts leaves the file byte-identical.
        let before = fs::read(&paths.store_path).expect("read");
        let again = collect_experiment(&paths, Metric::Ipc).expect("collect");
        assert_eq!(again.merge.changed(), 0);
        assert_eq!(fs::read(&paths.store_path).expect("read"), before);
    }

    #[test]
    fn missing_artifact_dir_is_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let id = ExperimentId::new("l1", "s", "x").expect("id");
        let paths = ExperimentPaths::new(temp.path(), &id, Metric::Ipc);
        let err = collect_experiment(&paths, Metric::Ipc).expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::Configuration(_))
        ));
    }
}
