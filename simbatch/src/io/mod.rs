//! I/O helpers for simbatch commands.

pub mod artifact;
pub mod atomic;
pub mod config;
pub mod process;
pub mod simulator;
pub mod store_file;
pub mod summary;
pub mod traces;
