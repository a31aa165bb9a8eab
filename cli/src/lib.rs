//! Recall command-line driver
//!
//! Thin maintenance front end over `recall-memory`: index rebuilds, the
//! periodic linking pass, cohesion reports and hook context injection.

pub mod commands;
pub mod error;
pub mod output;

pub use commands::{run, Cli, Command};
pub use error::{CliError, CliResult};
