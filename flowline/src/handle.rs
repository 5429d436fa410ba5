// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline — the lazy, checkpointable, single-consumer handle
//!
//! A `Pipeline` owns a deferred factory, an optional materialized root
//! source, and a sticky `broken` flag. The factory is invoked at most once,
//! on the first call to `next`/`record_position`/`reload_position`; after
//! that, `reset` reuses the materialized source rather than re-invoking the
//! factory (SPEC_FULL.md §4.1 — both choices are indistinguishable to
//! callers, and reuse is simpler to reason about for composite operators
//! that hold a `Pipeline` as a child and want to restart it repeatedly).

use crate::builder::Factory;
use flowline_domain::{BoxSource, PipelineResult, Record, Tape};

/// A lazily-materialized, checkpointable sequence of records.
pub struct Pipeline {
    factory: Factory,
    source: Option<BoxSource>,
    broken: Option<flowline_domain::PipelineError>,
}

impl Pipeline {
    pub(crate) fn new(factory: Factory) -> Self {
        Self {
            factory,
            source: None,
            broken: None,
        }
    }

    fn ensure_initialized(&mut self) -> PipelineResult<&mut BoxSource> {
        if self.source.is_none() {
            let source = (self.factory)()?;
            self.source = Some(source);
        }
        Ok(self.source.as_mut().expect("source just initialized"))
    }

    /// Produces the next record, or `None` at end of stream. Any failure
    /// raised by the operator chain sets the sticky broken flag and is
    /// re-raised on every subsequent call until `reset`.
    pub fn next(&mut self) -> PipelineResult<Option<Record>> {
        if let Some(err) = &self.broken {
            return Err(err.clone());
        }
        let outcome = match self.ensure_initialized() {
            Ok(source) => source.next(),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            self.broken = Some(err.clone());
        }
        outcome
    }

    /// Clears the broken flag and resets the materialized source in place
    /// (or does nothing if the pipeline was never pulled).
    pub fn reset(&mut self) -> PipelineResult<()> {
        self.broken = None;
        match self.source.as_mut() {
            Some(source) => source.reset(),
            None => Ok(()),
        }
    }

    pub fn record_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        if let Some(err) = &self.broken {
            return Err(err.clone());
        }
        let source = self.ensure_initialized()?;
        source.record_position(tape)
    }

    pub fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        if let Some(err) = &self.broken {
            return Err(err.clone());
        }
        let source = self.ensure_initialized()?;
        source.reload_position(tape)
    }

    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }
}
