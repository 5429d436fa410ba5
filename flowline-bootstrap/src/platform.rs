// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Platform Information
//!
//! The teacher's bootstrap layer abstracts an entire `Platform` trait behind
//! `#[cfg(unix)]`/`#[cfg(windows)]` implementations (page size, memory stats,
//! executable-bit checks, file sync) because its pipeline does its own
//! chunked file I/O and needs to tune buffer sizes to the host. `flowline`
//! has no file I/O of its own beyond `list_files`' directory walk, so the
//! only thing worth asking the OS is how many threads to default
//! `ParallelMapOp`/`zip`'s rayon pool to.

/// Logical CPU count available to this process, used as the fallback
/// default when a caller doesn't pick a `num_parallel_calls`/rayon pool size
/// explicitly.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_count_is_at_least_one() {
        assert!(cpu_count() >= 1);
    }
}
