// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Property tests over arbitrary inputs for the invariants that quantify
//! across many shapes of pipeline rather than one fixed scenario:
//! determinism, checkpoint round-trip, broken stickiness, order
//! preservation, and sharding partition.

use proptest::prelude::*;

use flowline::sources::read_list;
use flowline::Tape;
use flowline_domain::{PipelineError, Record};

fn drain(mut pipeline: flowline::Pipeline) -> Vec<i64> {
    let mut out = Vec::new();
    while let Some(record) = pipeline.next().unwrap() {
        out.push(record.as_int().unwrap());
    }
    out
}

proptest! {
    /// Running the same chain twice from scratch always produces the same
    /// output sequence — nothing in the stateless/stateful operators reads
    /// from ambient, run-dependent state.
    #[test]
    fn map_filter_chain_is_deterministic(values in prop::collection::vec(-1000i64..1000, 0..200)) {
        let build = || {
            read_list(values.iter().copied().map(Record::int).collect())
                .map(|r| Ok(Record::int(r.as_int().unwrap() * 2)))
                .filter(|r| r.as_int().unwrap_or(0) % 3 != 0)
                .and_return()
        };
        prop_assert_eq!(drain(build()), drain(build()));
    }

    /// Checkpointing mid-stream and reloading into a freshly-built chain
    /// picks up exactly where the original left off.
    #[test]
    fn checkpoint_round_trips_at_any_cut_point(
        values in prop::collection::vec(-100i64..100, 1..50),
        cut in 0usize..50,
    ) {
        let cut = cut.min(values.len());
        let build = || read_list(values.iter().copied().map(Record::int).collect()).and_return();

        let mut original = build();
        let mut prefix = Vec::new();
        for _ in 0..cut {
            match original.next().unwrap() {
                Some(record) => prefix.push(record.as_int().unwrap()),
                None => break,
            }
        }

        let mut tape = Tape::new();
        original.record_position(&mut tape).unwrap();

        let mut resumed = build();
        tape.rewind();
        resumed.reload_position(&mut tape).unwrap();

        let mut tail_from_original = Vec::new();
        while let Some(record) = original.next().unwrap() {
            tail_from_original.push(record.as_int().unwrap());
        }
        let tail_from_resumed = drain(resumed);

        prop_assert_eq!(&tail_from_original, &tail_from_resumed);

        let mut whole: Vec<i64> = prefix;
        whole.extend(tail_from_original);
        let expected: Vec<i64> = values;
        prop_assert_eq!(whole, expected);
    }

    /// Once a pipeline has raised once, every subsequent `next()` re-raises
    /// the same error until an explicit `reset()` — regardless of how many
    /// records preceded the failure or how many more calls are made after.
    #[test]
    fn broken_flag_is_sticky_across_many_calls(
        good_count in 0usize..20,
        extra_calls in 1usize..10,
    ) {
        let mut values: Vec<Record> = (0..good_count as i64).map(Record::int).collect();
        values.push(Record::int(-1));
        let mut pipeline = read_list(values)
            .map(|r| {
                let n = r.as_int().unwrap();
                if n < 0 {
                    Err(PipelineError::operator("test", "negative"))
                } else {
                    Ok(r)
                }
            })
            .and_return();

        for _ in 0..good_count {
            prop_assert!(pipeline.next().unwrap().is_some());
        }
        prop_assert!(pipeline.next().is_err());
        for _ in 0..extra_calls {
            prop_assert!(pipeline.next().is_err());
            prop_assert!(pipeline.is_broken());
        }

        pipeline.reset().unwrap();
        prop_assert!(!pipeline.is_broken());
    }

    /// `filter`/`skip`/`take` never reorder what survives them.
    #[test]
    fn filter_and_skip_preserve_relative_order(
        values in prop::collection::vec(0i64..500, 0..200),
        skip_n in 0u64..50,
    ) {
        let expected: Vec<i64> = values
            .iter()
            .copied()
            .filter(|v| v % 2 == 0)
            .skip(skip_n as usize)
            .collect();
        let pipeline = read_list(values.iter().copied().map(Record::int).collect())
            .filter(|r| r.as_int().unwrap_or(1) % 2 == 0)
            .skip(skip_n)
            .and_return();
        prop_assert_eq!(drain(pipeline), expected);
    }

    /// Every record lands in exactly one of `count` shards, and each shard's
    /// output, taken in global stream order, is a subsequence of the input
    /// that reassembles it when interleaved back together.
    #[test]
    fn sharding_partitions_without_loss_or_duplication(
        values in prop::collection::vec(0i64..1000, 0..300),
        count in 1usize..8,
    ) {
        let mut reassembled = vec![None; values.len()];
        for index in 0..count {
            let pipeline = read_list(values.iter().copied().map(Record::int).collect())
                .shard(index, count)
                .unwrap()
                .and_return();
            let shard_out = drain(pipeline);
            let owned_positions: Vec<usize> = (0..values.len()).filter(|i| i % count == index).collect();
            prop_assert_eq!(shard_out.len(), owned_positions.len());
            for (position, value) in owned_positions.into_iter().zip(shard_out) {
                prop_assert_eq!(reassembled[position], None);
                reassembled[position] = Some(value);
            }
        }
        let reassembled: Vec<i64> = reassembled.into_iter().map(|v| v.unwrap()).collect();
        prop_assert_eq!(reassembled, values);
    }
}
