// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Structured logging setup. Every operator transition worth observing
//! (`map` callback failures, broken-pipeline poisoning, zip length
//! mismatches) goes through `tracing`; this module wires that up to a
//! process-wide subscriber once, at process start.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::LoggingSettings;

/// Installs the global `tracing` subscriber. Safe to call at most once per
/// process — a second call is a programmer error, not a runtime one, so it
/// panics rather than returning a `PipelineError`.
pub fn init(settings: &LoggingSettings) {
    let level = parse_level(&settings.level);
    let builder = FmtSubscriber::builder().with_max_level(level);

    let result = if settings.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    if let Err(err) = result {
        panic!("flowline: logging already initialized: {err}");
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("verbose"), Level::INFO);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
    }
}
