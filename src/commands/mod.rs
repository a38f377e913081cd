//! CLI command implementations for script-status-exporter.
//!
//! This module provides implementations for all CLI subcommands:
//! - `test`: Run a script once and print its metrics
//! - `scripts`: List configured scripts

pub mod scripts;

// Re-export command functions
pub use scripts::command_scripts;
pub use test::command_test;
