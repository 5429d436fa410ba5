// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Builder — the fluent, move-only operator chain accumulator
//!
//! Each method consumes `self` and returns a new `Builder` wrapping a
//! [`Factory`] that, when invoked, first materializes the upstream then
//! wraps it in the new operator. Nothing is constructed until `and_return()`
//! hands the final factory to a [`Pipeline`] and that pipeline is first
//! pulled — operator instantiation is deferred, repeatable, and free of
//! shared state across pipeline copies (SPEC_FULL.md §4.1).

use std::sync::Arc;

use flowline_domain::value_objects::{Parallelism, ShardSpec};
use flowline_domain::{BoxSource, PipelineError, PipelineResult, Record};

use crate::handle::Pipeline;
use crate::operators::concurrent::{ParallelMapOp, PrefetchOp};
use crate::operators::stateful::{BucketByLengthOp, BucketOp, ShuffleOp};
use crate::operators::stateless::{FilterOp, MapOp, ShardOp, SkipOp, TakeOp, YieldFromOp};

/// Deferred constructor for a chain's root source, invoked at most once.
pub type Factory = Arc<dyn Fn() -> PipelineResult<BoxSource> + Send + Sync>;

pub type MapFn = Arc<dyn Fn(Record) -> PipelineResult<Record> + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;
pub type LengthFn = Arc<dyn Fn(&Record) -> u64 + Send + Sync>;
pub type YieldFn = Arc<dyn Fn(&Record) -> PipelineResult<Pipeline> + Send + Sync>;

/// Single-use, move-only accumulator of an operator chain factory.
pub struct Builder {
    factory: Factory,
}

impl Builder {
    pub(crate) fn new(factory: Factory) -> Self {
        Self { factory }
    }

    /// Sequential `map`. Equivalent to `map_parallel(f, 1, false)`.
    pub fn map(self, f: impl Fn(Record) -> PipelineResult<Record> + Send + Sync + 'static) -> Self {
        self.map_parallel(f, 1, false)
    }

    /// `map` with `warn_only`: callback failures are logged and the record
    /// is skipped rather than breaking the pipeline.
    pub fn map_warn_only(self, f: impl Fn(Record) -> PipelineResult<Record> + Send + Sync + 'static) -> Self {
        self.map_parallel(f, 1, true)
    }

    /// `map(f, num_parallel_calls)`. `num_parallel_calls <= 1` selects the
    /// sequential stateless form; `> 1` selects the concurrent stage
    /// (SPEC_FULL.md §4.5).
    pub fn map_parallel(
        self,
        f: impl Fn(Record) -> PipelineResult<Record> + Send + Sync + 'static,
        num_parallel_calls: usize,
        warn_only: bool,
    ) -> Self {
        let map_fn: MapFn = Arc::new(f);
        let width = Parallelism::new(num_parallel_calls);
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || {
            let source = upstream()?;
            if width.is_sequential() {
                Ok(Box::new(MapOp::new(source, map_fn.clone(), warn_only)) as BoxSource)
            } else {
                Ok(Box::new(ParallelMapOp::new(source, map_fn.clone(), width.get(), warn_only)) as BoxSource)
            }
        });
        Builder::new(factory)
    }

    pub fn filter(self, predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        let predicate_fn: PredicateFn = Arc::new(predicate);
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || Ok(Box::new(FilterOp::new(upstream()?, predicate_fn.clone())) as BoxSource));
        Builder::new(factory)
    }

    pub fn skip(self, n: u64) -> Self {
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || Ok(Box::new(SkipOp::new(upstream()?, n)) as BoxSource));
        Builder::new(factory)
    }

    pub fn take(self, n: u64) -> Self {
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || Ok(Box::new(TakeOp::new(upstream()?, n)) as BoxSource));
        Builder::new(factory)
    }

    /// Emits records whose global index modulo `count` equals `index`.
    /// Fails immediately (before any source is materialized) if `index >=
    /// count` or `count == 0`.
    pub fn shard(self, index: usize, count: usize) -> PipelineResult<Self> {
        let spec = ShardSpec::new(index, count)?;
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || Ok(Box::new(ShardOp::new(upstream()?, spec)) as BoxSource));
        Ok(Builder::new(factory))
    }

    /// For each upstream record `r`, streams every record of `g(r)` before
    /// pulling the next upstream record.
    pub fn yield_from(self, g: impl Fn(&Record) -> PipelineResult<Pipeline> + Send + Sync + 'static) -> Self {
        let yield_fn: YieldFn = Arc::new(g);
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || Ok(Box::new(YieldFromOp::new(upstream()?, yield_fn.clone())) as BoxSource));
        Builder::new(factory)
    }

    /// Accumulates `n` records into a single `List` record.
    pub fn bucket(self, n: u64, drop_remainder: bool) -> Self {
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || Ok(Box::new(BucketOp::new(upstream()?, n, drop_remainder)) as BoxSource));
        Builder::new(factory)
    }

    /// Length-bucketed batching. `bucket_sizes` is `(max_len, batch_size)`
    /// pairs; fails if empty.
    pub fn bucket_by_length(
        self,
        bucket_sizes: Vec<(u64, u64)>,
        length_fn: impl Fn(&Record) -> u64 + Send + Sync + 'static,
        drop_remainder: bool,
        warn_only: bool,
    ) -> PipelineResult<Self> {
        if bucket_sizes.is_empty() {
            return Err(PipelineError::Configuration("bucket_by_length: bucket_sizes must not be empty".to_string()));
        }
        let mut sorted = bucket_sizes;
        sorted.sort_by_key(|(max_len, _)| *max_len);
        let length_fn: LengthFn = Arc::new(length_fn);
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || {
            Ok(Box::new(BucketByLengthOp::new(
                upstream()?,
                sorted.clone(),
                length_fn.clone(),
                drop_remainder,
                warn_only,
            )) as BoxSource)
        });
        Ok(Builder::new(factory))
    }

    /// Reservoir shuffle over a window of up to `window` records.
    /// `seed` initializes the deterministic PRNG (SPEC_FULL.md §4.4).
    pub fn shuffle(self, window: usize, strict: bool, enabled: bool, seed: u64) -> Self {
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || Ok(Box::new(ShuffleOp::new(upstream()?, window, strict, enabled, seed)) as BoxSource));
        Builder::new(factory)
    }

    /// Background producer pulling up to `n` records ahead into a bounded
    /// FIFO queue.
    pub fn prefetch(self, n: usize) -> Self {
        let depth = Parallelism::new(n).get();
        let upstream = self.factory;
        let factory: Factory = Arc::new(move || Ok(Box::new(PrefetchOp::new(upstream()?, depth)) as BoxSource));
        Builder::new(factory)
    }

    /// Finalizes the chain into a pipeline handle.
    pub fn and_return(self) -> Pipeline {
        Pipeline::new(self.factory)
    }
}

pub(crate) fn from_source_factory(factory: impl Fn() -> PipelineResult<BoxSource> + Send + Sync + 'static) -> Builder {
    Builder::new(Arc::new(factory))
}
