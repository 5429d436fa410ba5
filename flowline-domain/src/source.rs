// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Source — the operator capability contract
//!
//! Every node in a pipeline chain — leaf or transform — implements `Source`.
//! It is a small, object-safe capability set: produce the next record, reset
//! to the start, and write/restore resumption state to a [`Tape`].
//!
//! ## Object Safety
//!
//! A pipeline chain is a tree of heterogeneous operator types, so `Source`
//! must be usable as `Box<dyn Source>`. All methods take `&mut self` (or
//! `&self` for checkpointing, since a concurrent operator may need to quiesce
//! internally before mutating) and return owned values — no generic methods,
//! no `Self` by value.
//!
//! ## Thread Safety
//!
//! Implementations are single-owner: the pipeline handle is single-consumer
//! (SPEC_FULL.md §5) and no method is ever called concurrently by two
//! threads on the same source. `BoxSource` still requires `Send` — the
//! concurrent operators (`ParallelMap`, `Prefetch`) hand their upstream to a
//! worker pool behind a mutex, and `zip`'s default parallel fan-out pulls
//! sibling pipelines from rayon worker threads — but never `Sync`: access is
//! always externally serialized (a mutex, or disjoint ownership per thread),
//! never shared concurrently.

use crate::error::PipelineResult;
use crate::tape::Tape;

/// The pull/reset/checkpoint contract shared by every operator.
pub trait Source {
    /// Produces the next record, or `None` at end of stream.
    ///
    /// End of stream is not an error. Any other failure propagates as a
    /// [`crate::error::PipelineError`]; the caller (an upstream operator, or
    /// ultimately the pipeline handle) is responsible for adding stage
    /// context and, at the handle, setting the sticky broken flag.
    fn next(&mut self) -> PipelineResult<Option<crate::record::Record>>;

    /// Resets this source (and, transitively, its upstream) to the state it
    /// had before the first `next()` call.
    fn reset(&mut self) -> PipelineResult<()>;

    /// Appends this source's resumption state to `tape`, in pull order
    /// (upstream state is written before this operator's own state, so a
    /// reload can restore upstream first).
    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()>;

    /// Restores this source's resumption state from `tape`, in the same
    /// order it was written. Structural mismatches surface as
    /// [`crate::error::PipelineError::CorruptedCheckpoint`].
    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()>;
}

/// A boxed, heterogeneous operator chain node.
pub type BoxSource = Box<dyn Source + Send>;
