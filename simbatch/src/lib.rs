//! Bounded-concurrency simulation batches with an incremental result store.
//!
//! A batch runs the simulator once per trace, at most `workers` at a time,
//! captures each run's output as an artifact, extracts one metric from every
//! artifact, and merges the values into a per-experiment result store that
//! is only ever filled in, never overwritten. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (store merge, metric extraction,
//!   resume lookup). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, trace discovery, process
//!   execution, store persistence). Isolated behind traits where tests need it.
//!
//! Orchestration modules ([`dispatch`], [`batch`], [`collect`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod batch;
pub mod collect;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
