//! CLI module for the orgform tool.
//!
//! This module provides the command-line interface for validating
//! templates, planning changes and managing state.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;
