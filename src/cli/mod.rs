//! CLI module for leaddial - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
