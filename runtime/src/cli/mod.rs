//! CLI subcommand implementations for the customs-probe binary.

pub mod args;
pub mod doctor;
pub mod logging;
pub mod run;

pub use args::RunArgs;
