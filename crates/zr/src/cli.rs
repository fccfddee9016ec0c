//! Command line definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Polyglot task runner and workflow orchestrator.
#[derive(Debug, Parser)]
#[command(name = "zr", version, about, propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file (default: ./zr.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Colour output policy.
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one or more tasks and their dependencies.
    Run {
        /// Task names to run.
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Maximum parallel tasks (default: CPU count).
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Keep going after a task fails.
        #[arg(long)]
        no_fail_fast: bool,

        /// Bypass the cache for this run.
        #[arg(long)]
        no_cache: bool,

        /// Pass the terminal through to tasks instead of capturing output.
        #[arg(long)]
        inherit_stdio: bool,

        /// Disable resource sampling.
        #[arg(long)]
        no_monitor: bool,
    },

    /// List the tasks defined in the configuration.
    List,

    /// Show recent runs from the history log.
    History {
        /// Maximum records to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Cache maintenance.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    /// Delete every cache entry.
    Clear,
}

/// Parse process arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_a_task() {
        assert!(Cli::try_parse_from(["zr", "run"]).is_err());
        assert!(Cli::try_parse_from(["zr", "run", "build"]).is_ok());
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "zr",
            "run",
            "build",
            "test",
            "-j",
            "2",
            "--no-cache",
            "--no-fail-fast",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                tasks,
                jobs,
                no_fail_fast,
                no_cache,
                ..
            } => {
                assert_eq!(tasks, vec!["build", "test"]);
                assert_eq!(jobs, Some(2));
                assert!(no_fail_fast);
                assert!(no_cache);
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn history_defaults() {
        let cli = Cli::try_parse_from(["zr", "history"]).unwrap();
        match cli.command {
            Commands::History { limit, json } => {
                assert_eq!(limit, 20);
                assert!(!json);
            }
            other => panic!("expected History, got {other:?}"),
        }
    }

    #[test]
    fn cache_clear_parses() {
        let cli = Cli::try_parse_from(["zr", "cache", "clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                command: CacheCommands::Clear
            }
        ));
    }
}
