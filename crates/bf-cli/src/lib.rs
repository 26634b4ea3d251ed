//! baas-fleet: Command-line interface for the pipeline fleet
//!
//! Argument parsing, configuration layering, batch files, the meeting URL
//! prompt and terminal output. `main.rs` wires these to the orchestrator.

pub mod args;
pub mod batch;
pub mod output;
pub mod prompt;
pub mod settings;

pub use args::Cli;
