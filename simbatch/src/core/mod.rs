//! Deterministic, pure logic shared by the batch runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod extract;
pub mod resume;
pub mod store;
pub mod types;
