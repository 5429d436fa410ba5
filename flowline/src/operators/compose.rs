// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! `zip` and `round_robin` — SPEC_FULL.md §4.6. Unlike every other operator,
//! these are not `Builder` methods: they take ownership of whole sibling
//! [`Pipeline`]s rather than chaining off one upstream, so they're exposed
//! as free functions returning a new `Pipeline` directly.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use flowline_domain::{BoxSource, PipelineError, PipelineResult, Record, Source, Tape};

use crate::builder::Factory;
use crate::handle::Pipeline;

const OP_ZIP: u32 = 40;
const OP_ROUND_ROBIN: u32 = 41;

/// Pulls one record from each child per emission. Children are wrapped in
/// `RefCell` rather than owned directly: `Source::record_position` takes
/// `&self`, but `Pipeline::record_position` needs `&mut` to lazily
/// materialize an unpulled child, so checkpointing borrows each child
/// mutably through the cell while `next`/`reset` use `get_mut()` directly.
pub struct ZipOp {
    children: Vec<RefCell<Pipeline>>,
    names: Option<Vec<String>>,
    flatten: bool,
    warn_only: bool,
    disable_parallelism: bool,
    ended: bool,
}

impl ZipOp {
    fn new(children: Vec<RefCell<Pipeline>>, names: Option<Vec<String>>, flatten: bool, warn_only: bool, disable_parallelism: bool) -> Self {
        Self {
            children,
            names,
            flatten,
            warn_only,
            disable_parallelism,
            ended: false,
        }
    }

    /// Pulls every child once, in parallel by default (safe: each child is
    /// an independent `Pipeline`). The first error from any child — in
    /// declaration order — wins when more than one fails in the same round.
    fn pull_all(&mut self) -> PipelineResult<Vec<Option<Record>>> {
        let n = self.children.len();
        let mut slots: Vec<Option<PipelineResult<Option<Record>>>> = (0..n).map(|_| None).collect();
        if self.disable_parallelism {
            for (child, slot) in self.children.iter_mut().zip(slots.iter_mut()) {
                *slot = Some(child.get_mut().next());
            }
        } else {
            let children: Vec<&mut Pipeline> = self.children.iter_mut().map(|c| c.get_mut()).collect();
            let slot_refs: Vec<&mut Option<PipelineResult<Option<Record>>>> = slots.iter_mut().collect();
            rayon::scope(|scope| {
                for (child, slot) in children.into_iter().zip(slot_refs.into_iter()) {
                    scope.spawn(move |_| {
                        *slot = Some(child.next());
                    });
                }
            });
        }
        slots.into_iter().map(|s| s.expect("every slot filled")).collect()
    }

    /// Only reached when at least one child ended this round and
    /// `warn_only` is set: drains every still-live child to find the true
    /// length mismatch, logging once if any produced more records than the
    /// child that ended first. Resolves SPEC_FULL.md §9's open question by
    /// detecting the mismatch at shutdown rather than mid-stream.
    fn drain_for_mismatch_warning(&mut self, results: &[Option<Record>]) {
        let mut mismatched = false;
        for (child, result) in self.children.iter_mut().zip(results.iter()) {
            if result.is_some() {
                mismatched = true;
                loop {
                    match child.get_mut().next() {
                        Ok(Some(_)) => continue,
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }
        if mismatched {
            tracing::warn!("zip: child pipelines produced unequal lengths");
        }
    }

    fn compose(&self, records: Vec<Record>) -> PipelineResult<Record> {
        if self.flatten {
            if records.iter().all(|r| matches!(r, Record::Map(_))) {
                let mut merged = IndexMap::new();
                for record in records {
                    if let Record::Map(fields) = record {
                        for (key, value) in fields {
                            if merged.insert(key.clone(), value).is_some() {
                                return Err(PipelineError::operator("zip", format!("flatten: key collision on '{key}'")));
                            }
                        }
                    }
                }
                return Ok(Record::Map(merged));
            }
            if records.iter().all(|r| matches!(r, Record::List(_))) {
                let mut merged = Vec::new();
                for record in records {
                    if let Record::List(items) = record {
                        merged.extend(items);
                    }
                }
                return Ok(Record::list(merged));
            }
            return Err(PipelineError::operator(
                "zip",
                "flatten requires every child record to be a map, or every child record to be a list",
            ));
        }
        match &self.names {
            Some(names) => Ok(Record::Map(names.iter().cloned().zip(records).collect())),
            None => Ok(Record::list(records)),
        }
    }
}

impl Source for ZipOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        if self.ended {
            return Ok(None);
        }
        let results = self.pull_all()?;
        if results.iter().any(Option::is_none) {
            self.ended = true;
            if self.warn_only {
                self.drain_for_mismatch_warning(&results);
            }
            return Ok(None);
        }
        let records: Vec<Record> = results.into_iter().map(|r| r.expect("checked above")).collect();
        self.compose(records).map(Some)
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.ended = false;
        for child in &mut self.children {
            child.get_mut().reset()?;
        }
        Ok(())
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        tape.write_op_tag(OP_ZIP);
        tape.write_primitive(self.ended);
        for child in &self.children {
            child.borrow_mut().record_position(tape)?;
        }
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        tape.expect_op_tag(OP_ZIP)?;
        self.ended = tape.read_primitive::<bool>()?;
        for child in &mut self.children {
            child.get_mut().reload_position(tape)?;
        }
        Ok(())
    }
}

/// Combines independent pipelines into one composite stream, SPEC_FULL.md
/// §4.6. `names`, when supplied, must have one entry per child.
pub fn zip(
    children: Vec<Pipeline>,
    names: Option<Vec<String>>,
    flatten: bool,
    warn_only: bool,
    disable_parallelism: bool,
) -> PipelineResult<Pipeline> {
    if children.is_empty() {
        return Err(PipelineError::Configuration("zip: requires at least one child pipeline".to_string()));
    }
    if let Some(names) = &names {
        if names.len() != children.len() {
            return Err(PipelineError::Configuration(format!(
                "zip: {} names given for {} child pipelines",
                names.len(),
                children.len()
            )));
        }
    }
    // `Factory` is `Fn`, not `FnOnce`, but the children can only ever be
    // consumed once in practice: `Pipeline::reset` reuses the materialized
    // source instead of re-invoking the factory. `Arc<Mutex<Option<_>>>`
    // lets the closure still satisfy `Fn` while guarding against the
    // (never expected) case of a second invocation.
    let slot = Arc::new(Mutex::new(Some(children)));
    let factory: Factory = Arc::new(move || {
        let children = slot
            .lock()
            .take()
            .ok_or_else(|| PipelineError::Configuration("zip: factory invoked more than once".to_string()))?;
        let children = children.into_iter().map(RefCell::new).collect();
        Ok(Box::new(ZipOp::new(children, names.clone(), flatten, warn_only, disable_parallelism)) as BoxSource)
    });
    Ok(Pipeline::new(factory))
}

/// Round-robins across children, resetting and reusing each as it empties.
/// Ends only once every child has, on its own turn, come up empty
/// immediately after being reset (SPEC_FULL.md §9 resolves the open
/// question in favor of loop-with-reset over shortest-child-stops).
pub struct RoundRobinOp {
    children: Vec<RefCell<Pipeline>>,
    cursor: usize,
    empty_after_reset: Vec<bool>,
    ended: bool,
}

impl RoundRobinOp {
    fn new(children: Vec<RefCell<Pipeline>>) -> Self {
        let empty_after_reset = vec![false; children.len()];
        Self {
            children,
            cursor: 0,
            empty_after_reset,
            ended: false,
        }
    }
}

impl Source for RoundRobinOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        if self.ended {
            return Ok(None);
        }
        let n = self.children.len();
        loop {
            let idx = self.cursor;
            self.cursor = (idx + 1) % n;
            let child = self.children[idx].get_mut();
            if let Some(record) = child.next()? {
                self.empty_after_reset[idx] = false;
                return Ok(Some(record));
            }
            child.reset()?;
            match child.next()? {
                Some(record) => {
                    self.empty_after_reset[idx] = false;
                    return Ok(Some(record));
                }
                None => {
                    self.empty_after_reset[idx] = true;
                    if self.empty_after_reset.iter().all(|&empty| empty) {
                        self.ended = true;
                        return Ok(None);
                    }
                    continue;
                }
            }
        }
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.ended = false;
        self.cursor = 0;
        for (child, empty) in self.children.iter_mut().zip(self.empty_after_reset.iter_mut()) {
            *empty = false;
            child.get_mut().reset()?;
        }
        Ok(())
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        tape.write_op_tag(OP_ROUND_ROBIN);
        tape.write_primitive(self.cursor as u64);
        tape.write_primitive(self.ended);
        for (child, empty) in self.children.iter().zip(self.empty_after_reset.iter()) {
            tape.write_primitive(*empty);
            child.borrow_mut().record_position(tape)?;
        }
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        tape.expect_op_tag(OP_ROUND_ROBIN)?;
        self.cursor = tape.read_primitive::<u64>()? as usize;
        self.ended = tape.read_primitive::<bool>()?;
        for (child, empty) in self.children.iter_mut().zip(self.empty_after_reset.iter_mut()) {
            *empty = tape.read_primitive::<bool>()?;
            child.get_mut().reload_position(tape)?;
        }
        Ok(())
    }
}

/// Emits one record from each child in turn, looping forever as long as at
/// least one child is non-empty.
pub fn round_robin(children: Vec<Pipeline>) -> PipelineResult<Pipeline> {
    if children.is_empty() {
        return Err(PipelineError::Configuration("round_robin: requires at least one child pipeline".to_string()));
    }
    let slot = Arc::new(Mutex::new(Some(children)));
    let factory: Factory = Arc::new(move || {
        let children = slot
            .lock()
            .take()
            .ok_or_else(|| PipelineError::Configuration("round_robin: factory invoked more than once".to_string()))?;
        let children = children.into_iter().map(RefCell::new).collect();
        Ok(Box::new(RoundRobinOp::new(children)) as BoxSource)
    });
    Ok(Pipeline::new(factory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::read_list;

    #[test]
    fn zip_pairs_named_children() {
        let a = read_list(vec![Record::str("a"), Record::str("b"), Record::str("c")]).and_return();
        let b = read_list(vec![Record::int(1), Record::int(2)]).and_return();
        let mut p = zip(vec![a, b], Some(vec!["k".to_string(), "v".to_string()]), false, false, true).unwrap();

        let first = p.next().unwrap().unwrap();
        let m = first.as_map().unwrap();
        assert_eq!(m.get("k"), Some(&Record::str("a")));
        assert_eq!(m.get("v"), Some(&Record::int(1)));

        let second = p.next().unwrap().unwrap();
        let m = second.as_map().unwrap();
        assert_eq!(m.get("k"), Some(&Record::str("b")));
        assert_eq!(m.get("v"), Some(&Record::int(2)));

        assert_eq!(p.next().unwrap(), None);
    }

    #[test]
    fn zip_flatten_merges_maps() {
        let mut a_fields = IndexMap::new();
        a_fields.insert("x".to_string(), Record::int(1));
        let a = read_list(vec![Record::Map(a_fields)]).and_return();
        let mut b_fields = IndexMap::new();
        b_fields.insert("y".to_string(), Record::int(2));
        let b = read_list(vec![Record::Map(b_fields)]).and_return();

        let mut p = zip(vec![a, b], None, true, false, true).unwrap();
        let merged = p.next().unwrap().unwrap();
        let m = merged.as_map().unwrap();
        assert_eq!(m.get("x"), Some(&Record::int(1)));
        assert_eq!(m.get("y"), Some(&Record::int(2)));
    }

    #[test]
    fn zip_parallel_preserves_order_and_stops_at_shortest() {
        let a = read_list((1..=5).map(Record::int).collect()).and_return();
        let b = read_list((1..=3).map(Record::int).collect()).and_return();
        let mut p = zip(vec![a, b], None, false, false, false).unwrap();
        let mut count = 0;
        while let Some(record) = p.next().unwrap() {
            let items = record.as_list().unwrap();
            assert_eq!(items[0], Record::int(count + 1));
            assert_eq!(items[1], Record::int(count + 1));
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn round_robin_alternates_and_resets_shorter_child() {
        let a = read_list(vec![Record::int(1), Record::int(2)]).and_return();
        let b = read_list(vec![Record::int(10), Record::int(20), Record::int(30)]).and_return();
        let mut p = round_robin(vec![a, b]).unwrap();
        let mut out = Vec::new();
        for _ in 0..8 {
            out.push(p.next().unwrap().unwrap().as_int().unwrap());
        }
        assert_eq!(out, vec![1, 10, 2, 20, 1, 30, 2, 10]);
    }

    #[test]
    fn round_robin_ends_when_every_child_is_empty() {
        let a = read_list(Vec::<Record>::new()).and_return();
        let b = read_list(Vec::<Record>::new()).and_return();
        let mut p = round_robin(vec![a, b]).unwrap();
        assert_eq!(p.next().unwrap(), None);
    }

    #[test]
    fn round_robin_checkpoint_round_trips() {
        let a = read_list(vec![Record::int(1), Record::int(2)]).and_return();
        let b = read_list(vec![Record::int(10), Record::int(20), Record::int(30)]).and_return();
        let mut p = round_robin(vec![a, b]).unwrap();
        let mut first = Vec::new();
        for _ in 0..3 {
            first.push(p.next().unwrap().unwrap().as_int().unwrap());
        }
        let mut tape = Tape::new();
        p.record_position(&mut tape).unwrap();

        let a2 = read_list(vec![Record::int(1), Record::int(2)]).and_return();
        let b2 = read_list(vec![Record::int(10), Record::int(20), Record::int(30)]).and_return();
        let mut resumed = round_robin(vec![a2, b2]).unwrap();
        tape.rewind();
        resumed.reload_position(&mut tape).unwrap();
        let mut tail = Vec::new();
        for _ in 0..5 {
            tail.push(resumed.next().unwrap().unwrap().as_int().unwrap());
        }
        assert_eq!(tail, vec![20, 1, 30, 2, 10]);
    }
}
