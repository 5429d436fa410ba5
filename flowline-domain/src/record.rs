// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Record — the opaque payload the pipeline runtime moves
//!
//! `Record` is the tagged value every [`crate::source::Source`] produces and
//! every operator passes through, transforms, or regroups. The runtime never
//! inspects a `Record`'s contents except through caller-supplied callbacks
//! (`map_fn`, `predicate_fn`, `data_length_fn`, `yield_fn`); it is otherwise
//! opaque cargo.
//!
//! `Map` uses an [`IndexMap`] rather than a `HashMap` so that key order is
//! preserved: `zip`'s flattening and the checkpoint tape both depend on
//! iterating a record's fields in a deterministic order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An opaque, tagged record flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Record {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Record>),
    Map(IndexMap<String, Record>),
}

impl Record {
    pub fn int(v: i64) -> Self {
        Record::Int(v)
    }

    pub fn str(v: impl Into<String>) -> Self {
        Record::Str(v.into())
    }

    pub fn list(items: impl IntoIterator<Item = Record>) -> Self {
        Record::List(items.into_iter().collect())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Record::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Record>> {
        match self {
            Record::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Record]> {
        match self {
            Record::List(items) => Some(items),
            _ => None,
        }
    }

    /// Rough length used by `bucket_by_length`'s default `data_length_fn`
    /// helpers in tests: element count for `List`, byte length for `Bytes`
    /// and `Str`, 1 otherwise.
    pub fn approx_len(&self) -> u64 {
        match self {
            Record::List(items) => items.len() as u64,
            Record::Bytes(b) => b.len() as u64,
            Record::Str(s) => s.len() as u64,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let r = Record::list([Record::int(1), Record::str("a")]);
        let json = serde_json::to_string(&r).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn map_preserves_key_order() {
        let mut m = IndexMap::new();
        m.insert("b".to_string(), Record::int(2));
        m.insert("a".to_string(), Record::int(1));
        let r = Record::Map(m);
        let keys: Vec<_> = r.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
    }
}
