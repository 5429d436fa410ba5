// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Layered Runtime Configuration
//!
//! Runtime tunables (default concurrency widths, shuffle defaults, logging
//! format) come from three layers, lowest precedence first: built-in
//! defaults, an optional config file (TOML/YAML/JSON, format inferred from
//! its extension), then `FLOWLINE_*` environment variables. None of this
//! affects operator *semantics* — every value here is a default a caller's
//! `Builder` call can still override per pipeline. The concurrency defaults
//! themselves come from `flowline_bootstrap::platform::cpu_count()`, the
//! same logical-CPU count the bootstrap layer falls back to when a caller
//! doesn't size a rayon pool explicitly.

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use flowline_domain::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowlineConfig {
    pub concurrency: ConcurrencySettings,
    pub shuffle: ShuffleSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Default `num_parallel_calls` for `map_parallel` when a caller doesn't
    /// pick one explicitly.
    pub default_parallel_map_width: usize,
    /// Default queue depth for `prefetch`.
    pub default_prefetch_depth: usize,
    /// Size of the global rayon pool `zip`'s parallel fan-out runs on.
    /// `None` defers to rayon's own default (`available_parallelism`).
    pub rayon_threads: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShuffleSettings {
    pub default_window: usize,
    pub default_seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `"trace"` | `"debug"` | `"info"` | `"warn"` | `"error"`.
    pub level: String,
    /// `"pretty"` | `"json"`.
    pub format: String,
}

impl Default for FlowlineConfig {
    fn default() -> Self {
        let cpu_count = flowline_bootstrap::platform::cpu_count();
        Self {
            concurrency: ConcurrencySettings {
                default_parallel_map_width: cpu_count,
                default_prefetch_depth: cpu_count * 2,
                rayon_threads: None,
            },
            shuffle: ShuffleSettings {
                default_window: 1024,
                default_seed: 0,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl FlowlineConfig {
    /// Builds the layered configuration. `path`, if given, is added as a
    /// source only when it exists on disk — a missing file is not an
    /// error, since defaults already cover every field.
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("concurrency.default_parallel_map_width", defaults.concurrency.default_parallel_map_width as i64)
            .map_err(config_err)?
            .set_default("concurrency.default_prefetch_depth", defaults.concurrency.default_prefetch_depth as i64)
            .map_err(config_err)?
            .set_default("shuffle.default_window", defaults.shuffle.default_window as i64)
            .map_err(config_err)?
            .set_default("shuffle.default_seed", defaults.shuffle.default_seed as i64)
            .map_err(config_err)?
            .set_default("logging.level", defaults.logging.level.clone())
            .map_err(config_err)?
            .set_default("logging.format", defaults.logging.format.clone())
            .map_err(config_err)?;

        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            } else {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
            }
        }

        builder = builder.add_source(Environment::with_prefix("FLOWLINE").separator("__"));

        builder.build().map_err(config_err)?.try_deserialize().map_err(config_err)
    }
}

fn config_err(err: config::ConfigError) -> PipelineError {
    PipelineError::Configuration(format!("loading flowline config: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_used_when_no_file_given() {
        let config = FlowlineConfig::load(None).unwrap();
        assert_eq!(config, FlowlineConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = FlowlineConfig::load(Some(Path::new("/nonexistent/flowline.toml"))).unwrap();
        assert_eq!(config, FlowlineConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowline.toml");
        std::fs::write(&path, "[concurrency]\ndefault_parallel_map_width = 16\n").unwrap();
        let config = FlowlineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.concurrency.default_parallel_map_width, 16);
        assert_eq!(config.concurrency.default_prefetch_depth, FlowlineConfig::default().concurrency.default_prefetch_depth);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowline.toml");
        std::fs::write(&path, "[shuffle]\ndefault_window = 50\n").unwrap();
        std::env::set_var("FLOWLINE__SHUFFLE__DEFAULT_WINDOW", "99");
        let config = FlowlineConfig::load(Some(&path)).unwrap();
        std::env::remove_var("FLOWLINE__SHUFFLE__DEFAULT_WINDOW");
        assert_eq!(config.shuffle.default_window, 99);
    }
}
