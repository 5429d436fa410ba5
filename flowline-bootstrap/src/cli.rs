// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  1. Cli::parse()                     │  clap argument parsing
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  2. validate_cli()                   │  path existence / numeric range
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  3. ValidatedCli                     │  safe to hand to main.rs
//! └─────────────────────────────────────┘
//! ```

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

/// Flowline: a composable, checkpointable data-loading pipeline runtime.
#[derive(Debug, Parser)]
#[command(name = "flowline", version, about)]
struct Cli {
    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a runtime settings file (TOML/YAML/JSON); see `flowline::config`.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a pipeline from a declarative config and drain it.
    Run {
        /// Path to a `PipelineSpec` file (YAML/JSON).
        pipeline: PathBuf,
        /// Write a checkpoint tape here once the pipeline is exhausted, or
        /// immediately if shutdown is requested mid-run.
        #[arg(long)]
        checkpoint_out: Option<PathBuf>,
        /// Stop after this many records even if the pipeline has more.
        #[arg(long)]
        max_records: Option<u64>,
    },
    /// Reload a checkpoint tape and continue draining from where it left off.
    Resume {
        /// Path to the same `PipelineSpec` file the checkpoint was taken against.
        pipeline: PathBuf,
        /// Path to the checkpoint tape to reload.
        checkpoint_in: PathBuf,
        /// Write a fresh checkpoint here on exit.
        #[arg(long)]
        checkpoint_out: Option<PathBuf>,
        #[arg(long)]
        max_records: Option<u64>,
    },
    /// Print the operator chain a pipeline config describes, without running it.
    Describe {
        /// Path to a `PipelineSpec` file (YAML/JSON).
        pipeline: PathBuf,
    },
}

/// CLI configuration after parsing and validation.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub command: ValidatedCommand,
    pub verbose: bool,
    pub settings: Option<PathBuf>,
}

/// Validated command variants. Every path named here is guaranteed to exist
/// on disk at the time of validation (it may still vanish before use — the
/// runtime handles that as an ordinary I/O `PipelineError`, not a CLI one).
#[derive(Debug, Clone)]
pub enum ValidatedCommand {
    Run {
        pipeline: PathBuf,
        checkpoint_out: Option<PathBuf>,
        max_records: Option<u64>,
    },
    Resume {
        pipeline: PathBuf,
        checkpoint_in: PathBuf,
        checkpoint_out: Option<PathBuf>,
        max_records: Option<u64>,
    },
    Describe {
        pipeline: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid value for --{arg}: {reason}")]
    InvalidValue { arg: String, reason: String },

    #[error("path does not exist: {0}")]
    PathNotFound(PathBuf),
}

/// Parses CLI arguments and validates them.
///
/// # Errors
///
/// Returns [`ParseError`] if any path argument is missing or any numeric
/// argument is out of range. Clap handles `--help`/`--version` and malformed
/// arguments on its own and exits the process before this function returns.
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    let cli = Cli::parse();
    validate_cli(cli)
}

fn validate_existing_path(path: PathBuf) -> Result<PathBuf, ParseError> {
    if !path.exists() {
        return Err(ParseError::PathNotFound(path));
    }
    Ok(path)
}

fn validate_max_records(max_records: Option<u64>) -> Result<(), ParseError> {
    if let Some(0) = max_records {
        return Err(ParseError::InvalidValue {
            arg: "max-records".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

fn validate_cli(cli: Cli) -> Result<ValidatedCli, ParseError> {
    if let Some(ref path) = cli.settings {
        validate_existing_path(path.clone())?;
    }

    let command = match cli.command {
        Commands::Run { pipeline, checkpoint_out, max_records } => {
            validate_max_records(max_records)?;
            ValidatedCommand::Run {
                pipeline: validate_existing_path(pipeline)?,
                checkpoint_out,
                max_records,
            }
        }
        Commands::Resume { pipeline, checkpoint_in, checkpoint_out, max_records } => {
            validate_max_records(max_records)?;
            ValidatedCommand::Resume {
                pipeline: validate_existing_path(pipeline)?,
                checkpoint_in: validate_existing_path(checkpoint_in)?,
                checkpoint_out,
                max_records,
            }
        }
        Commands::Describe { pipeline } => ValidatedCommand::Describe {
            pipeline: validate_existing_path(pipeline)?,
        },
    };

    Ok(ValidatedCli {
        command,
        verbose: cli.verbose,
        settings: cli.settings,
    })
}

impl fmt::Display for ValidatedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatedCommand::Run { pipeline, .. } => write!(f, "run {}", pipeline.display()),
            ValidatedCommand::Resume { pipeline, .. } => write!(f, "resume {}", pipeline.display()),
            ValidatedCommand::Describe { pipeline } => write!(f, "describe {}", pipeline.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pipeline_path_is_rejected() {
        let cli = Cli {
            verbose: false,
            settings: None,
            command: Commands::Describe { pipeline: PathBuf::from("/nonexistent/pipeline.yaml") },
        };
        let err = validate_cli(cli).unwrap_err();
        assert!(matches!(err, ParseError::PathNotFound(_)));
    }

    #[test]
    fn zero_max_records_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = dir.path().join("pipeline.yaml");
        std::fs::write(&pipeline, "source: {type: read_list, values: []}\n").unwrap();
        let cli = Cli {
            verbose: false,
            settings: None,
            command: Commands::Run { pipeline, checkpoint_out: None, max_records: Some(0) },
        };
        let err = validate_cli(cli).unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { .. }));
    }

    #[test]
    fn valid_run_command_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = dir.path().join("pipeline.yaml");
        std::fs::write(&pipeline, "source: {type: read_list, values: []}\n").unwrap();
        let cli = Cli {
            verbose: true,
            settings: None,
            command: Commands::Run { pipeline: pipeline.clone(), checkpoint_out: None, max_records: Some(10) },
        };
        let validated = validate_cli(cli).unwrap();
        assert!(validated.verbose);
        assert!(matches!(validated.command, ValidatedCommand::Run { max_records: Some(10), .. }));
    }
}
