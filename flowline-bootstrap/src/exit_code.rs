// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Exit Codes
//!
//! Maps a top-level `Result` onto the process's exit status using the
//! `sysexits.h` convention, the same vocabulary the teacher's bootstrap layer
//! uses for its own `map_error_to_exit_code`.

use std::process::ExitCode as ProcessExitCode;

use flowline_domain::PipelineError;

/// Unix-style exit codes (a subset of `sysexits.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    /// EX_USAGE — a CLI argument was invalid.
    Usage = 64,
    /// EX_DATAERR — the pipeline's input, or its checkpoint, was malformed.
    DataErr = 65,
    /// EX_SOFTWARE — an operator raised, or the pipeline was left broken.
    Software = 70,
    /// EX_CONFIG — a builder call was given invalid configuration.
    Config = 78,
}

impl From<ExitCode> for ProcessExitCode {
    fn from(code: ExitCode) -> Self {
        ProcessExitCode::from(code as u8)
    }
}

/// Classifies a [`PipelineError`] into the exit code a `run`/`resume`
/// invocation should terminate with.
pub fn map_pipeline_error(err: &PipelineError) -> ExitCode {
    match err {
        PipelineError::Broken(_) => ExitCode::Software,
        PipelineError::Operator { .. } => ExitCode::Software,
        PipelineError::CorruptedCheckpoint(_) => ExitCode::DataErr,
        PipelineError::Configuration(_) => ExitCode::Config,
    }
}

/// Classifies a top-level `anyhow` result into an [`ExitCode`] without
/// converting to `std::process::ExitCode` yet, so callers (and tests) can
/// compare the classification directly.
pub fn classify(result: &anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::Ok,
        Err(err) => err.downcast_ref::<PipelineError>().map(map_pipeline_error).unwrap_or(ExitCode::Software),
    }
}

/// Converts a top-level pipeline result into a process exit code, printing
/// the error to stderr when present. This is the one place `flowline`'s
/// binary touches `anyhow`-flavored top-level context — everything below it
/// deals in `PipelineError`.
pub fn result_to_exit_code(result: anyhow::Result<()>) -> ProcessExitCode {
    let code = classify(&result);
    if let Err(err) = result {
        eprintln!("flowline: {err:#}");
    }
    ProcessExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_pipeline_error_variant() {
        assert_eq!(map_pipeline_error(&PipelineError::Broken("x".to_string())), ExitCode::Software);
        assert_eq!(map_pipeline_error(&PipelineError::operator("stage", "boom")), ExitCode::Software);
        assert_eq!(map_pipeline_error(&PipelineError::CorruptedCheckpoint("x".to_string())), ExitCode::DataErr);
        assert_eq!(map_pipeline_error(&PipelineError::Configuration("x".to_string())), ExitCode::Config);
    }

    #[test]
    fn ok_result_classifies_as_ok() {
        assert_eq!(classify(&Ok(())), ExitCode::Ok);
    }

    #[test]
    fn pipeline_error_result_classifies_through_downcast() {
        let err: anyhow::Error = PipelineError::Configuration("bad shard".to_string()).into();
        assert_eq!(classify(&Err(err)), ExitCode::Config);
    }
}
