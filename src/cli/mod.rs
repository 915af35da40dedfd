//! Command-line interface for evalforge.
//!
//! Provides commands for the prediction pass, the judge pass, metric
//! aggregation, and the combined end-to-end run.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
