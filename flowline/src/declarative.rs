// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Declarative pipeline assembly
//!
//! [`Builder`] is a Rust-only fluent API — its closures can't round-trip
//! through a config file. This module is the serializable subset the `run`,
//! `resume`, and `describe` CLI subcommands build from: a [`PipelineSpec`]
//! names a leaf source and a chain of stages using a small fixed vocabulary
//! of transforms and predicates, and [`PipelineSpec::build`] materializes it
//! through the same `Builder` every other caller of this crate uses.

use serde::{Deserialize, Serialize};

use flowline_domain::{PipelineError, PipelineResult, Record};

use crate::builder::Builder;
use crate::sources;
use crate::Pipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    ReadList { values: Vec<i64> },
    ListFiles { root: String, pattern: Option<String> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Double,
    Increment,
    Negate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Even,
    Odd,
    Positive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StageSpec {
    Map {
        transform: Transform,
        #[serde(default)]
        num_parallel_calls: Option<usize>,
        #[serde(default)]
        warn_only: bool,
    },
    Filter {
        predicate: Predicate,
    },
    Skip {
        n: u64,
    },
    Take {
        n: u64,
    },
    Shard {
        index: usize,
        count: usize,
    },
    Shuffle {
        window: usize,
        #[serde(default)]
        strict: bool,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        seed: u64,
    },
    Prefetch {
        depth: usize,
    },
    Bucket {
        n: u64,
        #[serde(default)]
        drop_remainder: bool,
    },
}

fn default_true() -> bool {
    true
}

/// A complete, named pipeline chain as read from a `run`/`resume`/`describe`
/// config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub source: SourceSpec,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    pub fn build(&self) -> PipelineResult<Pipeline> {
        let mut builder = self.source.into_builder();
        for stage in &self.stages {
            builder = stage.apply(builder)?;
        }
        Ok(builder.and_return())
    }

    /// Human-readable operator chain, one arrow-joined line, for the
    /// `describe` subcommand — never materializes a source.
    pub fn describe(&self) -> String {
        let mut parts = vec![self.source.describe()];
        parts.extend(self.stages.iter().map(StageSpec::describe));
        parts.join(" -> ")
    }
}

impl SourceSpec {
    fn into_builder(&self) -> Builder {
        match self {
            SourceSpec::ReadList { values } => sources::read_list(values.iter().map(|v| Record::int(*v)).collect()),
            SourceSpec::ListFiles { root, pattern } => sources::list_files(root.clone(), pattern.clone()),
        }
    }

    fn describe(&self) -> String {
        match self {
            SourceSpec::ReadList { values } => format!("read_list({} records)", values.len()),
            SourceSpec::ListFiles { root, pattern } => format!("list_files({root}, pattern={pattern:?})"),
        }
    }
}

impl StageSpec {
    fn apply(&self, builder: Builder) -> PipelineResult<Builder> {
        Ok(match self {
            StageSpec::Map { transform, num_parallel_calls, warn_only } => {
                builder.map_parallel(transform.into_fn(), num_parallel_calls.unwrap_or(1), *warn_only)
            }
            StageSpec::Filter { predicate } => builder.filter(predicate.into_fn()),
            StageSpec::Skip { n } => builder.skip(*n),
            StageSpec::Take { n } => builder.take(*n),
            StageSpec::Shard { index, count } => builder.shard(*index, *count)?,
            StageSpec::Shuffle { window, strict, enabled, seed } => builder.shuffle(*window, *strict, *enabled, *seed),
            StageSpec::Prefetch { depth } => builder.prefetch(*depth),
            StageSpec::Bucket { n, drop_remainder } => builder.bucket(*n, *drop_remainder),
        })
    }

    fn describe(&self) -> String {
        match self {
            StageSpec::Map { transform, num_parallel_calls, warn_only } => {
                format!("map({transform:?}, width={}, warn_only={warn_only})", num_parallel_calls.unwrap_or(1))
            }
            StageSpec::Filter { predicate } => format!("filter({predicate:?})"),
            StageSpec::Skip { n } => format!("skip({n})"),
            StageSpec::Take { n } => format!("take({n})"),
            StageSpec::Shard { index, count } => format!("shard({index}/{count})"),
            StageSpec::Shuffle { window, .. } => format!("shuffle(window={window})"),
            StageSpec::Prefetch { depth } => format!("prefetch({depth})"),
            StageSpec::Bucket { n, drop_remainder } => format!("bucket({n}, drop_remainder={drop_remainder})"),
        }
    }
}

impl Transform {
    fn into_fn(self) -> impl Fn(Record) -> PipelineResult<Record> + Send + Sync + 'static {
        move |record: Record| {
            let n = record
                .as_int()
                .ok_or_else(|| PipelineError::operator("map", "transform requires an int record"))?;
            let result = match self {
                Transform::Double => n * 2,
                Transform::Increment => n + 1,
                Transform::Negate => -n,
            };
            Ok(Record::int(result))
        }
    }
}

impl Predicate {
    fn into_fn(self) -> impl Fn(&Record) -> bool + Send + Sync + 'static {
        move |record: &Record| {
            let n = record.as_int().unwrap_or(0);
            match self {
                Predicate::Even => n % 2 == 0,
                Predicate::Odd => n % 2 != 0,
                Predicate::Positive => n > 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_drains_a_simple_chain() {
        let spec = PipelineSpec {
            source: SourceSpec::ReadList { values: vec![1, 2, 3, 4, 5] },
            stages: vec![
                StageSpec::Filter { predicate: Predicate::Odd },
                StageSpec::Map { transform: Transform::Double, num_parallel_calls: None, warn_only: false },
            ],
        };
        let mut pipeline = spec.build().unwrap();
        let mut out = Vec::new();
        while let Some(record) = pipeline.next().unwrap() {
            out.push(record.as_int().unwrap());
        }
        assert_eq!(out, vec![2, 6, 10]);
    }

    #[test]
    fn describe_never_materializes_a_source() {
        let spec = PipelineSpec {
            source: SourceSpec::ListFiles { root: "/nonexistent/path/xyz".to_string(), pattern: None },
            stages: vec![StageSpec::Take { n: 10 }],
        };
        let description = spec.describe();
        assert!(description.contains("list_files"));
        assert!(description.contains("take(10)"));
    }

    #[test]
    fn deserializes_from_yaml() {
        let yaml = r#"
source:
  type: read_list
  values: [1, 2, 3]
stages:
  - op: map
    transform: increment
  - op: take
    n: 2
"#;
        let spec: PipelineSpec = serde_yaml::from_str(yaml).unwrap();
        let mut pipeline = spec.build().unwrap();
        assert_eq!(pipeline.next().unwrap().unwrap().as_int(), Some(2));
        assert_eq!(pipeline.next().unwrap().unwrap().as_int(), Some(3));
        assert_eq!(pipeline.next().unwrap(), None);
    }
}
