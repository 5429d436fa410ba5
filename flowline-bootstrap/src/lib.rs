// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Module
//!
//! The bootstrap module sits **outside** the `flowline` runtime and provides
//! everything a process entry point needs that the runtime itself has no
//! business knowing about:
//!
//! - **CLI parsing** - `run` / `resume` / `describe` subcommands, validated
//!   before the runtime ever sees them.
//! - **Exit codes** - mapping a `PipelineError` onto a Unix-style exit status.
//! - **Shutdown coordination** - a Ctrl-C handler that flips a flag the
//!   synchronous drive loop polls between records, rather than the runtime
//!   depending on an async runtime itself.
//! - **Logging** - a minimal trait used during the bootstrap phase itself,
//!   before `flowline::logging::init` installs the process-wide subscriber.
//!
//! ## Architecture Position
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               flowline (runtime + bin)       │
//! │  - Builder / Pipeline / operators            │
//! │  - main.rs composition root                  │
//! └─────────────────┬─────────────────────────────┘
//!                    │ depends on
//!                    ▼
//! ┌─────────────────────────────────────────────┐
//! │          BOOTSTRAP (this crate)              │
//! │  - CLI parsing & validation                  │
//! │  - Exit code mapping                         │
//! │  - Ctrl-C shutdown coordination               │
//! └─────────────────┬─────────────────────────────┘
//!                    │ depends on
//!                    ▼
//! ┌─────────────────────────────────────────────┐
//! │            flowline-domain (model)           │
//! │  - Record / Source / Tape / PipelineError    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! `flowline` depends on this crate and on `flowline-domain`; this crate
//! depends only on `flowline-domain`, never back on `flowline`, so the CLI
//! layer can't accidentally reach into runtime internals.

pub mod cli;
pub mod exit_code;
pub mod logger;
pub mod platform;
pub mod shutdown;

pub use cli::{parse_and_validate, ParseError, ValidatedCli, ValidatedCommand};
pub use exit_code::{result_to_exit_code, ExitCode};
pub use logger::{BootstrapLogger, ConsoleLogger};

/// Parses and validates the process's CLI arguments.
///
/// Clap handles `--help`/`--version` and exits the process on its own;
/// everything else is returned as a [`ValidatedCli`] for the caller to act
/// on and eventually map to an [`ExitCode`] via [`result_to_exit_code`].
pub fn bootstrap_cli() -> Result<ValidatedCli, ParseError> {
    cli::parse_and_validate()
}
