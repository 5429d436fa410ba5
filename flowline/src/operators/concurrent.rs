// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Concurrent operators — SPEC_FULL.md §4.5. Both stages spawn plain
//! `std::thread` workers the first time they're pulled (not at
//! construction, so an operator chain built but never driven never starts
//! threads) and quiesce them before checkpointing, mirroring the teacher's
//! `BasicStageExecutor` pattern of `parking_lot`-guarded shared state
//! accessed from a worker pool.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver};
use parking_lot::Mutex;

use flowline_domain::{BoxSource, PipelineError, PipelineResult, Record, Source, Tape};

use crate::builder::MapFn;

const OP_PARALLEL_MAP: u32 = 30;
const OP_PREFETCH: u32 = 31;

enum SlotOutcome {
    Record(Record),
    Failed(PipelineError),
}

struct SharedUpstream {
    source: BoxSource,
    cursor: u64,
}

/// Everything the consumer thread touches. Guarded by a single mutex on
/// `ParallelMapOp` so `record_position`/`reload_position` — which must
/// quiesce and inspect worker state — can take `&self` per the `Source`
/// contract while still mutating.
struct Engine {
    shared: Arc<Mutex<SharedUpstream>>,
    map_fn: MapFn,
    warn_only: bool,
    width: usize,
    cancel: Arc<AtomicBool>,
    result_rx: Option<Receiver<(u64, SlotOutcome)>>,
    workers: Vec<JoinHandle<()>>,
    buffer: BTreeMap<u64, SlotOutcome>,
    next_emit: u64,
    started: bool,
}

impl Engine {
    fn ensure_started(&mut self) {
        if self.started {
            return;
        }
        self.cancel.store(false, Ordering::SeqCst);
        let (tx, rx) = unbounded::<(u64, SlotOutcome)>();
        for _ in 0..self.width {
            let shared = Arc::clone(&self.shared);
            let map_fn = Arc::clone(&self.map_fn);
            let cancel = Arc::clone(&self.cancel);
            let tx = tx.clone();
            let handle = std::thread::Builder::new()
                .name("flowline-parallel-map".to_string())
                .spawn(move || {
                    loop {
                        if cancel.load(Ordering::SeqCst) {
                            return;
                        }
                        let (index, pulled) = {
                            let mut guard = shared.lock();
                            let index = guard.cursor;
                            let pulled = guard.source.next();
                            guard.cursor += 1;
                            (index, pulled)
                        };
                        match pulled {
                            Ok(Some(record)) => {
                                let outcome = match (map_fn)(record.clone()) {
                                    Ok(mapped) => SlotOutcome::Record(mapped),
                                    Err(err) => SlotOutcome::Failed(PipelineError::operator_with_record("map", err, record)),
                                };
                                if tx.send((index, outcome)).is_err() {
                                    return;
                                }
                            }
                            Ok(None) => return,
                            Err(err) => {
                                let _ = tx.send((index, SlotOutcome::Failed(err)));
                                return;
                            }
                        }
                    }
                })
                .expect("failed to spawn parallel map worker");
            self.workers.push(handle);
        }
        self.result_rx = Some(rx);
        self.started = true;
    }

    /// Cancels further pulls and joins every worker. A worker that has
    /// already committed to a pull always finishes and sends its result
    /// before checking `cancel` again, so after this returns, `buffer`
    /// holds every index in `[next_emit, cursor)` with no gaps.
    fn quiesce(&mut self) {
        if !self.started {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(rx) = self.result_rx.take() {
            for handle in self.workers.drain(..) {
                let _ = handle.join();
            }
            while let Ok((index, outcome)) = rx.try_recv() {
                self.buffer.insert(index, outcome);
            }
        }
        self.started = false;
    }
}

pub struct ParallelMapOp {
    engine: Mutex<Engine>,
}

impl ParallelMapOp {
    pub fn new(upstream: BoxSource, map_fn: MapFn, width: usize, warn_only: bool) -> Self {
        Self {
            engine: Mutex::new(Engine {
                shared: Arc::new(Mutex::new(SharedUpstream { source: upstream, cursor: 0 })),
                map_fn,
                warn_only,
                width: width.max(2),
                cancel: Arc::new(AtomicBool::new(false)),
                result_rx: None,
                workers: Vec::new(),
                buffer: BTreeMap::new(),
                next_emit: 0,
                started: false,
            }),
        }
    }
}

impl Source for ParallelMapOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        let mut engine = self.engine.lock();
        engine.ensure_started();
        loop {
            let next_emit = engine.next_emit;
            if let Some(outcome) = engine.buffer.remove(&next_emit) {
                engine.next_emit += 1;
                match outcome {
                    SlotOutcome::Record(record) => return Ok(Some(record)),
                    SlotOutcome::Failed(err) => {
                        if engine.warn_only {
                            tracing::warn!(error = %err, "parallel map: skipping record after callback failure");
                            continue;
                        }
                        return Err(err);
                    }
                }
            }
            let rx = engine.result_rx.as_ref().expect("parallel map started").clone();
            match rx.recv() {
                Ok((index, outcome)) => {
                    engine.buffer.insert(index, outcome);
                }
                Err(_) => return Ok(None),
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        let mut engine = self.engine.lock();
        engine.quiesce();
        engine.buffer.clear();
        engine.next_emit = 0;
        let mut shared = engine.shared.lock();
        shared.cursor = 0;
        shared.source.reset()
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        let mut engine = self.engine.lock();
        engine.quiesce();
        let cursor = {
            let shared = engine.shared.lock();
            shared.source.record_position(tape)?;
            shared.cursor
        };
        tape.write_op_tag(OP_PARALLEL_MAP);
        tape.write_primitive(cursor);
        let results: Vec<Record> = (engine.next_emit..cursor)
            .filter_map(|i| match engine.buffer.get(&i) {
                Some(SlotOutcome::Record(r)) => Some(r.clone()),
                _ => None,
            })
            .collect();
        tape.write_record_vec(&results);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        let mut engine = self.engine.lock();
        engine.quiesce();
        {
            let mut shared = engine.shared.lock();
            shared.source.reload_position(tape)?;
        }
        tape.expect_op_tag(OP_PARALLEL_MAP)?;
        let cursor = tape.read_primitive::<u64>()?;
        let results = tape.read_record_vec()?;
        engine.shared.lock().cursor = cursor;
        engine.buffer.clear();
        engine.next_emit = cursor - results.len() as u64;
        let next_emit = engine.next_emit;
        for (offset, record) in results.into_iter().enumerate() {
            engine.buffer.insert(next_emit + offset as u64, SlotOutcome::Record(record));
        }
        Ok(())
    }
}

impl Drop for ParallelMapOp {
    fn drop(&mut self) {
        self.engine.lock().quiesce();
    }
}

struct PrefetchEngine {
    upstream: Arc<Mutex<BoxSource>>,
    depth: usize,
    cancel: Arc<AtomicBool>,
    rx: Option<Receiver<PipelineResult<Option<Record>>>>,
    producer: Option<JoinHandle<()>>,
    exhausted: bool,
    terminal_error: Option<PipelineError>,
}

impl PrefetchEngine {
    fn ensure_started(&mut self) {
        if self.rx.is_some() || self.exhausted || self.terminal_error.is_some() {
            return;
        }
        self.cancel.store(false, Ordering::SeqCst);
        let (tx, rx) = crossbeam::channel::bounded::<PipelineResult<Option<Record>>>(self.depth);
        let cancel = Arc::clone(&self.cancel);
        let upstream = Arc::clone(&self.upstream);
        let producer = std::thread::Builder::new()
            .name("flowline-prefetch".to_string())
            .spawn(move || loop {
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                let outcome = upstream.lock().next();
                let terminal = matches!(outcome, Ok(None) | Err(_));
                if tx.send(outcome).is_err() || terminal {
                    return;
                }
            })
            .expect("failed to spawn prefetch producer");
        self.producer = Some(producer);
        self.rx = Some(rx);
    }

    /// Stops the producer and drops any items still buffered in the
    /// channel. The upstream itself was never moved out of `self.upstream`
    /// — the producer only ever borrowed it through the shared mutex — so
    /// it is always intact for `reset`/`record_position` to use directly,
    /// whether or not a producer thread happens to be running.
    fn quiesce(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.rx = None;
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

/// Background producer pulling up to `n` records ahead into a bounded FIFO
/// queue; the consumer dequeues in the same order. Per SPEC_FULL.md §4.5,
/// checkpointing the queue is lossy by design: unread prefetched items are
/// discarded and only the upstream position is recorded, so resume refills
/// from there rather than replaying the discarded items.
pub struct PrefetchOp {
    engine: Mutex<PrefetchEngine>,
}

impl PrefetchOp {
    pub fn new(upstream: BoxSource, depth: usize) -> Self {
        Self {
            engine: Mutex::new(PrefetchEngine {
                upstream: Arc::new(Mutex::new(upstream)),
                depth: depth.max(1),
                cancel: Arc::new(AtomicBool::new(false)),
                rx: None,
                producer: None,
                exhausted: false,
                terminal_error: None,
            }),
        }
    }
}

impl Source for PrefetchOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        let mut engine = self.engine.lock();
        if engine.exhausted {
            return Ok(None);
        }
        if let Some(err) = &engine.terminal_error {
            return Err(err.clone());
        }
        engine.ensure_started();
        let rx = engine.rx.as_ref().expect("prefetch started").clone();
        match rx.recv() {
            Ok(Ok(Some(record))) => Ok(Some(record)),
            Ok(Ok(None)) => {
                engine.exhausted = true;
                engine.quiesce();
                Ok(None)
            }
            Ok(Err(err)) => {
                engine.terminal_error = Some(err.clone());
                engine.quiesce();
                Err(err)
            }
            Err(_) => {
                engine.exhausted = true;
                Ok(None)
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        let mut engine = self.engine.lock();
        engine.quiesce();
        engine.exhausted = false;
        engine.terminal_error = None;
        let result = engine.upstream.lock().reset();
        result
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        let mut engine = self.engine.lock();
        engine.quiesce();
        engine.upstream.lock().record_position(tape)?;
        tape.write_op_tag(OP_PREFETCH);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        let mut engine = self.engine.lock();
        engine.quiesce();
        engine.upstream.lock().reload_position(tape)?;
        tape.expect_op_tag(OP_PREFETCH)?;
        engine.exhausted = false;
        engine.terminal_error = None;
        Ok(())
    }
}

impl Drop for PrefetchOp {
    fn drop(&mut self) {
        self.engine.lock().quiesce();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::read_list;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn parallel_map_preserves_order() {
        let mut p = read_list((1..=50).map(Record::int).collect())
            .map_parallel(|r| Ok(Record::int(r.as_int().unwrap() * 2)), 8, false)
            .and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r.as_int().unwrap());
        }
        let expected: Vec<i64> = (1..=50).map(|x| x * 2).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn parallel_map_warn_only_skips_failures() {
        let mut p = read_list((1..=10).map(Record::int).collect())
            .map_parallel(
                |r| {
                    let v = r.as_int().unwrap();
                    if v % 3 == 0 {
                        Err(PipelineError::operator("test", "divisible by three"))
                    } else {
                        Ok(r)
                    }
                },
                4,
                true,
            )
            .and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r.as_int().unwrap());
        }
        assert_eq!(out, vec![1, 2, 4, 5, 7, 8, 10]);
    }

    #[test]
    fn prefetch_preserves_order() {
        let mut p = read_list((1..=20).map(Record::int).collect()).prefetch(4).and_return();
        let mut out = Vec::new();
        while let Some(r) = p.next().unwrap() {
            out.push(r.as_int().unwrap());
        }
        assert_eq!(out, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_map_checkpoint_round_trips() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let mut p = read_list((1..=30).map(Record::int).collect())
            .map_parallel(
                move |r| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(r)
                },
                4,
                false,
            )
            .and_return();
        let mut first_half = Vec::new();
        for _ in 0..10 {
            first_half.push(p.next().unwrap().unwrap().as_int().unwrap());
        }
        let mut tape = Tape::new();
        p.record_position(&mut tape).unwrap();

        let mut resumed = read_list((1..=30).map(Record::int).collect())
            .map_parallel(|r| Ok(r), 4, false)
            .and_return();
        tape.rewind();
        resumed.reload_position(&mut tape).unwrap();
        let mut tail = Vec::new();
        while let Some(r) = resumed.next().unwrap() {
            tail.push(r.as_int().unwrap());
        }
        let mut expected_tail: Vec<i64> = (1..=30).collect();
        expected_tail.drain(0..10);
        assert_eq!(tail, expected_tail);
    }
}
