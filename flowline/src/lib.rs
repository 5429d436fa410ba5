// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Flowline
//!
//! A composable, checkpointable data-loading pipeline runtime. A [`Pipeline`]
//! is built from a [`Builder`] chained from a leaf source ([`sources`]),
//! transformed by stateless, stateful, and concurrent operators
//! ([`operators`]), and optionally combined with sibling pipelines via
//! [`operators::compose::zip`] / [`operators::compose::round_robin`].
//!
//! ```no_run
//! use flowline::sources::read_list;
//! use flowline_domain::Record;
//!
//! let mut pipeline = read_list(vec![Record::int(1), Record::int(2), Record::int(3)])
//!     .filter(|r| r.as_int().unwrap_or(0) % 2 == 1)
//!     .and_return();
//!
//! while let Some(record) = pipeline.next().unwrap() {
//!     println!("{record:?}");
//! }
//! ```

pub mod builder;
pub mod config;
pub mod declarative;
pub mod handle;
pub mod logging;
pub mod operators;
pub mod sources;

pub use builder::Builder;
pub use declarative::PipelineSpec;
pub use handle::Pipeline;

pub use flowline_domain::{PipelineError, PipelineResult, Record, Tape};
