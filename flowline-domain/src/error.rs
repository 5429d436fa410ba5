// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Error Taxonomy
//!
//! Four categories, matching the failure model in SPEC_FULL.md §7:
//!
//! - **Broken** — the handle is poisoned by a prior error; every operation
//!   but `reset`/`is_broken` refuses until `reset()` is called.
//! - **Operator** — a user callback or leaf source raised while producing or
//!   transforming a record; carries the offending record when the operator
//!   that caught it still has it in hand.
//! - **CorruptedCheckpoint** — a tape's structure didn't match what the
//!   operator graph expected on reload, or the tape ran out mid-restore.
//! - **Configuration** — invalid builder arguments (empty bucket sizes, a
//!   shard index at or past the shard count, a zero-width parallel map).
//!
//! End-of-stream (`Ok(None)` from `Source::next`) is never an error.

use crate::record::Record;
use thiserror::Error;

/// Domain-specific errors for the pipeline runtime.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("pipeline broken: {0}")]
    Broken(String),

    #[error("operator error in '{stage}': {message}")]
    Operator {
        stage: String,
        message: String,
        /// The record being processed when the failure occurred, if the
        /// operator still held it (e.g. a `map` callback failure carries its
        /// input; an upstream `next()` failure does not).
        record: Option<Box<Record>>,
    },

    #[error("pipeline corrupted checkpoint: {0}")]
    CorruptedCheckpoint(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn operator(stage: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PipelineError::Operator {
            stage: stage.into(),
            message: message.to_string(),
            record: None,
        }
    }

    pub fn operator_with_record(stage: impl Into<String>, message: impl std::fmt::Display, record: Record) -> Self {
        PipelineError::Operator {
            stage: stage.into(),
            message: message.to_string(),
            record: Some(Box::new(record)),
        }
    }

    /// Wraps this error with additional stage context, the way each operator
    /// on the failure path adds its own name before rethrowing (SPEC_FULL.md
    /// §7 "Propagation").
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            PipelineError::Operator { message, record, .. } => PipelineError::Operator {
                stage: stage.into(),
                message,
                record,
            },
            other => other,
        }
    }

    /// Whether this error should set the handle's sticky `broken` flag.
    /// `Configuration` errors are raised before a source is ever
    /// materialized and never poison a handle that already exists.
    pub fn poisons_pipeline(&self) -> bool {
        !matches!(self, PipelineError::Configuration(_) | PipelineError::Broken(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
