// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Flowline Domain
//!
//! The data model, operator contract, checkpoint codec, and error taxonomy
//! that the rest of the workspace is built against. This crate has no
//! concept of threads, files, or the CLI — it defines what a pipeline *is*,
//! not how one runs.
//!
//! ## Module Structure
//!
//! - [`record`] — the opaque, tagged [`Record`] value every operator moves.
//! - [`source`] — the [`Source`] trait: the pull/reset/checkpoint contract
//!   every operator implements.
//! - [`tape`] — the [`Tape`] checkpoint byte stream and its typed codec.
//! - [`error`] — the [`PipelineError`] taxonomy shared across the workspace.
//! - [`value_objects`] — small validated newtypes (`Parallelism`,
//!   `ShardSpec`) used by the builder.

pub mod error;
pub mod record;
pub mod source;
pub mod tape;
pub mod value_objects;

pub use error::{PipelineError, PipelineResult};
pub use record::Record;
pub use source::{BoxSource, Source};
pub use tape::Tape;
