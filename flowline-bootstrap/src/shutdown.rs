// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shutdown Coordination
//!
//! `flowline`'s drive loop is synchronous — it pulls `Pipeline::next()` on
//! the calling thread, with no `await` points to race a cancellation future
//! against. So unlike the teacher's `async`-native coordinator, cancellation
//! here is a single [`CancellationToken`]: a shared flag the loop polls
//! between records, set from a background thread that does nothing but wait
//! on `tokio::signal::ctrl_c()`. Tokio is confined to that one thread; the
//! pipeline runtime never sees it.
//!
//! ```no_run
//! use flowline_bootstrap::shutdown::ShutdownCoordinator;
//!
//! let coordinator = ShutdownCoordinator::install_ctrl_c_handler();
//! let token = coordinator.token();
//!
//! while !token.is_cancelled() {
//!     // pull and process one record, then check again
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, clonable cancellation flag.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Owns the background Ctrl-C listener thread and hands out [`CancellationToken`]
/// clones to whatever drive loop should stop early on SIGINT.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Spawns a background thread that blocks on a one-shot tokio runtime
    /// awaiting `ctrl_c()`, then cancels the returned coordinator's token.
    /// Safe to call at most once per process — a second Ctrl-C handler would
    /// just race harmlessly with the first, but there's never a reason to.
    pub fn install_ctrl_c_handler() -> Self {
        let token = CancellationToken::new();
        let background = token.clone();
        std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_io().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to start ctrl-c listener runtime");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                tracing::info!("received interrupt signal, requesting graceful shutdown");
                background.cancel();
            }
        });
        Self { token }
    }

    /// A coordinator with no signal handler wired up, for tests and for
    /// callers that manage cancellation themselves (e.g. `--max-records`).
    pub fn inert() -> Self {
        Self { token: CancellationToken::new() }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_uncancelled() {
        let coordinator = ShutdownCoordinator::inert();
        assert!(!coordinator.token().is_cancelled());
    }

    #[test]
    fn cancel_is_visible_across_clones() {
        let coordinator = ShutdownCoordinator::inert();
        let a = coordinator.token();
        let b = coordinator.token();
        a.cancel();
        assert!(b.is_cancelled());
    }
}
