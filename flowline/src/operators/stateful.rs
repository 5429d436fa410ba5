// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! `bucket`, `bucket_by_length`, `shuffle` — SPEC_FULL.md §4.4. Each holds a
//! window of buffered records that must be checkpointed alongside the
//! upstream position.

use std::collections::VecDeque;

use flowline_domain::{BoxSource, PipelineError, PipelineResult, Record, Source, Tape};

use crate::builder::LengthFn;

const OP_BUCKET: u32 = 20;
const OP_BUCKET_BY_LENGTH: u32 = 21;
const OP_SHUFFLE: u32 = 22;

pub struct BucketOp {
    upstream: BoxSource,
    n: u64,
    drop_remainder: bool,
    partial: Vec<Record>,
}

impl BucketOp {
    pub fn new(upstream: BoxSource, n: u64, drop_remainder: bool) -> Self {
        Self { upstream, n, drop_remainder, partial: Vec::new() }
    }
}

impl Source for BucketOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        loop {
            match self.upstream.next()? {
                Some(record) => {
                    self.partial.push(record);
                    if self.partial.len() as u64 == self.n {
                        return Ok(Some(Record::list(std::mem::take(&mut self.partial))));
                    }
                }
                None => {
                    if !self.drop_remainder && !self.partial.is_empty() {
                        return Ok(Some(Record::list(std::mem::take(&mut self.partial))));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.partial.clear();
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)?;
        tape.write_op_tag(OP_BUCKET);
        tape.write_record_vec(&self.partial);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)?;
        tape.expect_op_tag(OP_BUCKET)?;
        self.partial = tape.read_record_vec()?;
        Ok(())
    }
}

/// `bucket_sizes` is sorted ascending by `max_len` on construction (the
/// builder does this). Each record goes to the smallest bucket whose
/// `max_len` is at least its length; a length past the largest bound fails
/// unless `warn_only`.
pub struct BucketByLengthOp {
    upstream: BoxSource,
    bucket_sizes: Vec<(u64, u64)>,
    length_fn: LengthFn,
    drop_remainder: bool,
    warn_only: bool,
    buckets: Vec<Vec<Record>>,
    pending: VecDeque<Record>,
    upstream_ended: bool,
}

impl BucketByLengthOp {
    pub fn new(upstream: BoxSource, bucket_sizes: Vec<(u64, u64)>, length_fn: LengthFn, drop_remainder: bool, warn_only: bool) -> Self {
        let buckets = vec![Vec::new(); bucket_sizes.len()];
        Self {
            upstream,
            bucket_sizes,
            length_fn,
            drop_remainder,
            warn_only,
            buckets,
            pending: VecDeque::new(),
            upstream_ended: false,
        }
    }
}

impl Source for BucketByLengthOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            if self.upstream_ended {
                return Ok(None);
            }
            match self.upstream.next()? {
                Some(record) => {
                    let length = (self.length_fn)(&record);
                    match self.bucket_sizes.iter().position(|(max_len, _)| *max_len >= length) {
                        Some(bucket_index) => {
                            self.buckets[bucket_index].push(record);
                            let (_, batch_size) = self.bucket_sizes[bucket_index];
                            if self.buckets[bucket_index].len() as u64 == batch_size {
                                let emitted = std::mem::take(&mut self.buckets[bucket_index]);
                                self.pending.push_back(Record::list(emitted));
                            }
                        }
                        None if self.warn_only => {
                            tracing::warn!(length, "bucket_by_length: record exceeds largest bucket bound, skipping");
                        }
                        None => {
                            return Err(PipelineError::operator_with_record(
                                "bucket_by_length",
                                format!("record length {length} exceeds largest bucket bound"),
                                record,
                            ));
                        }
                    }
                }
                None => {
                    self.upstream_ended = true;
                    if !self.drop_remainder {
                        for bucket in self.buckets.iter_mut() {
                            if !bucket.is_empty() {
                                self.pending.push_back(Record::list(std::mem::take(bucket)));
                            }
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
        self.pending.clear();
        self.upstream_ended = false;
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)?;
        tape.write_op_tag(OP_BUCKET_BY_LENGTH);
        tape.write_primitive(self.buckets.len() as u64);
        for bucket in &self.buckets {
            tape.write_record_vec(bucket);
        }
        let pending: Vec<Record> = self.pending.iter().cloned().collect();
        tape.write_record_vec(&pending);
        tape.write_primitive(self.upstream_ended);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)?;
        tape.expect_op_tag(OP_BUCKET_BY_LENGTH)?;
        let bucket_count = tape.read_primitive::<u64>()? as usize;
        self.buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            self.buckets.push(tape.read_record_vec()?);
        }
        self.pending = tape.read_record_vec()?.into();
        self.upstream_ended = tape.read_primitive::<bool>()?;
        Ok(())
    }
}

/// A SplitMix64 generator: a single `u64` state word, scrambled and
/// advanced each draw. Chosen over a crate RNG so checkpointed state
/// replays bit-for-bit (SPEC_FULL.md §4.4) — no rejection sampling, no
/// draw-count-dependent internal state.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn gen_index(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        (self.next_u64() % bound as u64) as usize
    }
}

pub struct ShuffleOp {
    upstream: BoxSource,
    window: usize,
    strict: bool,
    enabled: bool,
    seed: u64,
    rng: SplitMix64,
    reservoir: Vec<Record>,
    upstream_ended: bool,
}

impl ShuffleOp {
    pub fn new(upstream: BoxSource, window: usize, strict: bool, enabled: bool, seed: u64) -> Self {
        Self {
            upstream,
            window: window.max(1),
            strict,
            enabled,
            seed,
            rng: SplitMix64::new(seed),
            reservoir: Vec::new(),
            upstream_ended: false,
        }
    }

    fn fill_to(&mut self, target: usize) -> PipelineResult<()> {
        while self.reservoir.len() < target && !self.upstream_ended {
            match self.upstream.next()? {
                Some(record) => self.reservoir.push(record),
                None => self.upstream_ended = true,
            }
        }
        Ok(())
    }
}

impl Source for ShuffleOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        if !self.enabled {
            return self.upstream.next();
        }
        if self.reservoir.is_empty() {
            // Strict mode always primes to a full window before the first
            // emission. Non-strict mode primes to just one record, so the
            // very first pull comes out as soon as anything is available
            // instead of waiting for the reservoir to saturate.
            let initial_target = if self.strict { self.window } else { 1 };
            self.fill_to(initial_target)?;
        } else if self.strict {
            self.fill_to(self.window)?;
        }
        if self.reservoir.is_empty() {
            return Ok(None);
        }
        if self.strict && !self.upstream_ended && self.reservoir.len() < self.window {
            // `fill_to(self.window)` only stops short of `window` when
            // upstream ended, so this branch is unreachable; kept for
            // clarity of the invariant.
            unreachable!("fill_to always saturates the reservoir unless upstream ended");
        }
        let index = self.rng.gen_index(self.reservoir.len());
        let chosen = self.reservoir.swap_remove(index);
        if !self.upstream_ended {
            // Top up toward the full window on every draw, not just by one —
            // non-strict mode's sparse first fill otherwise never grows into
            // a real shuffling window.
            self.fill_to(self.window)?;
        }
        Ok(Some(chosen))
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.reservoir.clear();
        self.upstream_ended = false;
        self.rng = SplitMix64::new(self.seed);
        self.upstream.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.record_position(tape)?;
        tape.write_op_tag(OP_SHUFFLE);
        tape.write_primitive(self.rng.state);
        tape.write_primitive(self.upstream_ended);
        if self.strict {
            tape.write_record_vec(&self.reservoir);
        }
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        self.upstream.reload_position(tape)?;
        tape.expect_op_tag(OP_SHUFFLE)?;
        self.rng.state = tape.read_primitive::<u64>()?;
        self.upstream_ended = tape.read_primitive::<bool>()?;
        self.reservoir = if self.strict { tape.read_record_vec()? } else { Vec::new() };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::read_list;

    #[test]
    fn bucket_scenario() {
        let mut p = read_list((1..=5).map(Record::int).collect()).bucket(2, false).and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r.as_list().unwrap().iter().map(|x| x.as_int().unwrap()).collect::<Vec<_>>());
        }
        assert_eq!(out, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn bucket_drop_remainder_discards_partial() {
        let mut p = read_list((1..=5).map(Record::int).collect()).bucket(2, true).and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r);
        }
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn bucket_by_length_routes_by_smallest_fit() {
        let mut p = read_list(vec![Record::str("a"), Record::str("ab"), Record::str("abc"), Record::str("abcd")])
            .bucket_by_length(vec![(2, 2), (4, 2)], |r| r.approx_len(), false, false)
            .unwrap()
            .and_return();
        let first = p.next().unwrap().unwrap();
        assert_eq!(first.as_list().unwrap().len(), 2); // "a","ab" fill the max_len=2 bucket first
    }

    #[test]
    fn bucket_by_length_fails_past_largest_bound_unless_warn_only() {
        let strict = read_list(vec![Record::str("toolong")]).bucket_by_length(vec![(2, 1)], |r| r.approx_len(), true, false);
        let mut p = strict.unwrap().and_return();
        assert!(p.next().is_err());

        let mut warned = read_list(vec![Record::str("toolong"), Record::str("ok")])
            .bucket_by_length(vec![(2, 1)], |r| r.approx_len(), true, true)
            .unwrap()
            .and_return();
        let out = warned.next().unwrap().unwrap();
        assert_eq!(out.as_list().unwrap()[0], Record::str("ok"));
    }

    #[test]
    fn shuffle_disabled_is_pass_through() {
        let mut p = read_list((1..=5).map(Record::int).collect()).shuffle(2, true, false, 7).and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r.as_int().unwrap());
        }
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn shuffle_same_seed_is_deterministic() {
        let make = || read_list((1..=20).map(Record::int).collect()).shuffle(5, true, true, 42).and_return();
        let drain = |mut p: crate::Pipeline| {
            let mut out = Vec::new();
            while let Some(r) = p.next().unwrap() {
                out.push(r.as_int().unwrap());
            }
            out
        };
        assert_eq!(drain(make()), drain(make()));
    }

    #[test]
    fn shuffle_non_strict_emits_before_reservoir_fills() {
        // window=1000 would never saturate over only 3 records; non-strict
        // mode must still emit its first record immediately rather than
        // blocking until upstream ends.
        let mut p = read_list((1..=3).map(Record::int).collect()).shuffle(1000, false, true, 3).and_return();
        assert!(p.next().unwrap().is_some());
    }

    #[test]
    fn shuffle_checkpoint_round_trips_when_strict() {
        let mut p = read_list((1..=20).map(Record::int).collect()).shuffle(5, true, true, 99).and_return();
        let mut first_run = Vec::new();
        for _ in 0..8 {
            first_run.push(p.next().unwrap().unwrap().as_int().unwrap());
        }
        let mut tape = Tape::new();
        p.record_position(&mut tape).unwrap();
        let mut resumed = read_list((1..=20).map(Record::int).collect()).shuffle(5, true, true, 99).and_return();
        tape.rewind();
        resumed.reload_position(&mut tape).unwrap();
        let mut tail_resumed = Vec::new();
        while let Some(r) = resumed.next().unwrap() {
            tail_resumed.push(r.as_int().unwrap());
        }
        let mut tail_original = Vec::new();
        while let Some(r) = p.next().unwrap() {
            tail_original.push(r.as_int().unwrap());
        }
        assert_eq!(tail_resumed, tail_original);
    }
}
