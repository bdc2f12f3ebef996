//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start the dialer daemon
//! - pull: one-shot search of the record store
//! - call-status: query the launch service for one call
//! - check-config: load and validate configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Leaddial - slot-based outbound call dispatcher
#[derive(Parser, Debug)]
#[command(name = "leaddial")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Whether logs should go to stderr instead of the log file
    pub fn logs_to_stderr(&self) -> bool {
        !matches!(self.command, Commands::Run { foreground: false, .. })
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the dialer: dispatch, reconciliation, intake and status sync
    Run {
        /// Log to stderr instead of the log file
        #[arg(short, long)]
        foreground: bool,

        /// Read newline-delimited JSON completion notifications from stdin
        #[arg(long)]
        stdin_notifications: bool,
    },

    /// Search the record store once and show the leads that would be queued
    Pull {
        /// Stop after this many leads
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Query the launch service for a call's status
    CallStatus {
        /// Call ID to check
        call_id: String,
    },

    /// Load, validate and summarise configuration
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["leaddial"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["leaddial", "-v", "-c", "/etc/leaddial.yml", "check-config"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/etc/leaddial.yml")));
        assert!(matches!(cli.command, Commands::CheckConfig));
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["leaddial", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                foreground,
                stdin_notifications,
            } => {
                assert!(!foreground);
                assert!(!stdin_notifications);
            }
            _ => panic!("Expected run command"),
        }
        assert!(!cli.logs_to_stderr());
    }

    #[test]
    fn test_run_foreground_with_notifications() {
        let cli = Cli::try_parse_from(["leaddial", "run", "--foreground", "--stdin-notifications"]).unwrap();
        match cli.command {
            Commands::Run {
                foreground,
                stdin_notifications,
            } => {
                assert!(foreground);
                assert!(stdin_notifications);
            }
            _ => panic!("Expected run command"),
        }
        assert!(cli.logs_to_stderr());
    }

    #[test]
    fn test_pull_limit() {
        let cli = Cli::try_parse_from(["leaddial", "pull", "-l", "25"]).unwrap();
        match cli.command {
            Commands::Pull { limit } => assert_eq!(limit, Some(25)),
            _ => panic!("Expected pull command"),
        }
        assert!(cli.logs_to_stderr());
    }

    #[test]
    fn test_call_status() {
        let cli = Cli::try_parse_from(["leaddial", "call-status", "call-123"]).unwrap();
        match cli.command {
            Commands::CallStatus { call_id } => assert_eq!(call_id, "call-123"),
            _ => panic!("Expected call-status command"),
        }
    }

    #[test]
    fn test_help_works() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_flag() {
        // Version flag causes early exit with error (expected)
        assert!(Cli::try_parse_from(["leaddial", "--version"]).is_err());
    }
}
