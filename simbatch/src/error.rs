//! Fatal error kinds.
//!
//! Per-job failures and extraction misses are not errors: they are recorded in
//! [`JobStatus`](crate::core::types::JobStatus) and as absent metric values.
//! Everything here aborts either the whole run (pre-flight) or one merge pass
//! (store failures). Other I/O failures travel as `anyhow::Error`.

use std::path::PathBuf;

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum BatchError {
    /// Invalid configuration, missing simulator, or no traces.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resume prefix {prefix:?} matches no trace id")]
    ResumeKeyNotFound { prefix: String },

    #[error("cannot read result store {}: {reason}", path.display())]
    StoreRead { path: PathBuf, reason: String },

    #[error("result store {} is locked by {holder} (remove {} if that process is gone)", path.display(), lock_path.display())]
    StoreLocked {
        path: PathBuf,
        lock_path: PathBuf,
        holder: String,
    },

    #[error("cannot replace result store {}", path.display())]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BatchError {
    pub fn configuration(message: impl Into<String>) -> Self {
        BatchError::Configuration(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            BatchError::Configuration(_) | BatchError::ResumeKeyNotFound { .. } => {
                exit_codes::INVALID
            }
            BatchError::StoreRead { .. }
            | BatchError::StoreLocked { .. }
            | BatchError::StoreWrite { .. } => exit_codes::STORE_FAILED,
        }
    }
}

/// Exit code for an error surfaced from a command.
///
/// Looks through `anyhow` context layers for a [`BatchError`]; anything else
/// is treated as invalid input.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BatchError>())
        .map_or(exit_codes::INVALID, BatchError::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn maps_kinds_to_exit_codes() {
        let err = BatchError::ResumeKeyNotFound {
            prefix: "9".to_string(),
        };
        assert_eq!(err.exit_code(), exit_codes::INVALID);
        let err = BatchError::StoreRead {
            path: PathBuf::from("store.txt"),
            reason: "bad".to_string(),
        };
        assert_eq!(err.exit_code(), exit_codes::STORE_FAILED);
    }

    #[test]
    fn finds_batch_error_under_context() {
        let err: anyhow::Result<()> = Err(BatchError::StoreWrite {
            path: PathBuf::from("store.txt"),
            source: std::io::Error::other("disk full"),
        }
        .into());
        let err = err.context("merge results").expect_err("error");
        assert_eq!(exit_code_for(&err), exit_codes::STORE_FAILED);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&plain), exit_codes::INVALID);
    }
}
