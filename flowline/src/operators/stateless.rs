// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! `map`, `filter`, `skip`, `take`, `shard`, `yield_from` — SPEC_FULL.md
//! §4.3. None of these suspend or spawn threads; each pulls its upstream
//! synchronously on the calling thread.

use std::cell::RefCell;

use flowline_domain::value_objects::ShardSpec;
use flowline_domain::{BoxSource, PipelineError, PipelineResult, Record, Source, Tape};

use crate::builder::{MapFn, PredicateFn, YieldFn};
use crate::handle::Pipeline;

const OP_SKIP: u32 = 10;
const OP_TAKE: u32 = 11;
const OP_SHARD: u32 = 12;
const OP_YIELD_FROM: u32 = 13;

/// Sequential `map(f, p=1)`. Carries no checkpoint state of its own — the
/// upstream position is the whole story.
pub struct MapOp {
    upstream: BoxSource,
    map_fn: MapFn,
    warn_only: bool,
}

impl MapOp {
    pub fn new(upstream: BoxSource, map_fn: MapFn, warn_only: bool) -> Self {
        Self { upstream, map_fn, warn_only }
    }
}

impl Source for MapOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        loop {
            let Some(record) = self.upstream.next()? else {
                return Ok(None);
            };
            let original = record.clone();
            match (self.map_fn)(record) {
                Ok(mapped) => return Ok(Some(mapped)),
                Err(err) if self.warn_only => {
                    tracing::warn!(error = %err, "map: skipping record after callback failure");
                    continue;
                }
                Err(err) => return Err(PipelineError::operator_with_record("map", err, original)),
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)
    }
}

pub struct FilterOp {
    upstream: BoxSource,
    predicate_fn: PredicateFn,
}

impl FilterOp {
    pub fn new(upstream: BoxSource, predicate_fn: PredicateFn) -> Self {
        Self { upstream, predicate_fn }
    }
}

impl Source for FilterOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        loop {
            match self.upstream.next()? {
                None => return Ok(None),
                Some(record) if (self.predicate_fn)(&record) => return Ok(Some(record)),
                Some(_) => continue,
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)
    }
}

pub struct SkipOp {
    upstream: BoxSource,
    original: u64,
    remaining: u64,
}

impl SkipOp {
    pub fn new(upstream: BoxSource, n: u64) -> Self {
        Self { upstream, original: n, remaining: n }
    }
}

impl Source for SkipOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        while self.remaining > 0 {
            match self.upstream.next()? {
                None => {
                    self.remaining = 0;
                    return Ok(None);
                }
                Some(_) => self.remaining -= 1,
            }
        }
        self.upstream.next()
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.remaining = self.original;
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)?;
        tape.write_op_tag(OP_SKIP);
        tape.write_primitive(self.remaining);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)?;
        tape.expect_op_tag(OP_SKIP)?;
        self.remaining = tape.read_primitive::<u64>()?;
        Ok(())
    }
}

pub struct TakeOp {
    upstream: BoxSource,
    original: u64,
    remaining: u64,
}

impl TakeOp {
    pub fn new(upstream: BoxSource, n: u64) -> Self {
        Self { upstream, original: n, remaining: n }
    }
}

impl Source for TakeOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.upstream.next()? {
            None => {
                self.remaining = 0;
                Ok(None)
            }
            Some(record) => {
                self.remaining -= 1;
                Ok(Some(record))
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.remaining = self.original;
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)?;
        tape.write_op_tag(OP_TAKE);
        tape.write_primitive(self.remaining);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)?;
        tape.expect_op_tag(OP_TAKE)?;
        self.remaining = tape.read_primitive::<u64>()?;
        Ok(())
    }
}

/// Checkpoints its own pull counter in addition to delegating to upstream:
/// the literal spec text says checkpoint = "upstream position", but an
/// upstream's tape encoding does not generically expose "how many records
/// were pulled" to a downstream reader, and without that count a resumed
/// shard would restart global indexing at zero and could emit records it
/// had already emitted before the checkpoint. Recording `next_index`
/// alongside the delegated upstream state keeps the partition invariant
/// across resume.
pub struct ShardOp {
    upstream: BoxSource,
    spec: ShardSpec,
    next_index: u64,
}

impl ShardOp {
    pub fn new(upstream: BoxSource, spec: ShardSpec) -> Self {
        Self { upstream, spec, next_index: 0 }
    }
}

impl Source for ShardOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        loop {
            match self.upstream.next()? {
                None => return Ok(None),
                Some(record) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    if self.spec.owns(index as usize) {
                        return Ok(Some(record));
                    }
                }
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.next_index = 0;
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)?;
        tape.write_op_tag(OP_SHARD);
        tape.write_primitive(self.next_index);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)?;
        tape.expect_op_tag(OP_SHARD)?;
        self.next_index = tape.read_primitive::<u64>()?;
        Ok(())
    }
}

/// For each upstream record, streams a sub-pipeline built by `yield_fn`
/// before pulling the next upstream record. `current` is wrapped in a
/// `RefCell` because `Source::record_position` takes `&self` but
/// checkpointing an active sub-pipeline requires `&mut` access to it
/// (`Pipeline::record_position` may need to lazily materialize); by the
/// time `current` is `Some`, its pipeline has always already been pulled at
/// least once inside `next`, so this is never a blind re-materialization.
pub struct YieldFromOp {
    upstream: BoxSource,
    yield_fn: YieldFn,
    current: RefCell<Option<(Record, Pipeline)>>,
}

impl YieldFromOp {
    pub fn new(upstream: BoxSource, yield_fn: YieldFn) -> Self {
        Self { upstream, yield_fn, current: RefCell::new(None) }
    }
}

impl Source for YieldFromOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        loop {
            {
                let mut current = self.current.borrow_mut();
                if let Some((_, sub)) = current.as_mut() {
                    match sub.next()? {
                        Some(record) => return Ok(Some(record)),
                        None => *current = None,
                    }
                }
            }
            match self.upstream.next()? {
                None => return Ok(None),
                Some(origin) => {
                    let sub = (self.yield_fn)(&origin)?;
                    *self.current.borrow_mut() = Some((origin, sub));
                }
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        *self.current.borrow_mut() = None;
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)?;
        tape.write_op_tag(OP_YIELD_FROM);
        let mut current = self.current.borrow_mut();
        match current.as_mut() {
            None => tape.write_primitive(false),
            Some((origin, sub)) => {
                tape.write_primitive(true);
                tape.write_record(origin);
                sub.record_position(tape)?;
            }
        }
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)?;
        tape.expect_op_tag(OP_YIELD_FROM)?;
        let has_sub = tape.read_primitive::<bool>()?;
        if has_sub {
            let origin = tape.read_record()?;
            let mut sub = (self.yield_fn)(&origin)?;
            sub.reload_position(tape)?;
            *self.current.borrow_mut() = Some((origin, sub));
        } else {
            *self.current.borrow_mut() = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::read_list;

    #[test]
    fn map_then_filter_scenario() {
        let mut p = read_list(vec![Record::int(1), Record::int(2), Record::int(3), Record::int(4), Record::int(5)])
            .map(|r| Ok(Record::int(r.as_int().unwrap() * r.as_int().unwrap())))
            .filter(|r| r.as_int().unwrap() % 2 == 1)
            .and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r.as_int().unwrap());
        }
        assert_eq!(out, vec![1, 9, 25]);
    }

    #[test]
    fn skip_and_take_past_end() {
        let mut took = read_list(vec![Record::int(1), Record::int(2), Record::int(3)]).take(10).and_return();
        let mut out = Vec::new();
        while let Some(r) = took.next().unwrap() {
            out.push(r.as_int().unwrap());
        }
        assert_eq!(out, vec![1, 2, 3]);

        let mut skipped = read_list(vec![Record::int(1), Record::int(2), Record::int(3)]).skip(10).and_return();
        assert_eq!(skipped.next().unwrap(), None);
    }

    #[test]
    fn shard_partitions_the_stream() {
        let inputs: Vec<Record> = (1..=10).map(Record::int).collect();
        let mut p = read_list(inputs).shard(1, 3).unwrap().and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r.as_int().unwrap());
        }
        assert_eq!(out, vec![2, 5, 8]);
    }

    #[test]
    fn shard_rejects_invalid_spec() {
        let b = read_list(vec![Record::int(1)]).shard(3, 3);
        assert!(b.is_err());
    }

    #[test]
    fn yield_from_streams_each_sub_pipeline_fully() {
        let mut p = read_list(vec![Record::int(1), Record::int(2)])
            .yield_from(|r| {
                let n = r.as_int().unwrap();
                Ok(read_list(vec![Record::int(n), Record::int(n * 10)]).and_return())
            })
            .and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r.as_int().unwrap());
        }
        assert_eq!(out, vec![1, 10, 2, 20]);
    }
}
