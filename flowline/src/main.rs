// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Binary entry point: CLI parsing and process lifecycle live in
//! `flowline-bootstrap`; everything here is the composition root that wires
//! a validated command to the runtime and maps the outcome to an exit code.

use std::path::Path;

use anyhow::Context;

use flowline::config::FlowlineConfig;
use flowline::{Pipeline, PipelineSpec, Tape};
use flowline_bootstrap::shutdown::{CancellationToken, ShutdownCoordinator};
use flowline_bootstrap::{bootstrap_cli, result_to_exit_code, BootstrapLogger, ConsoleLogger, ValidatedCommand};

fn main() -> std::process::ExitCode {
    let bootstrap_logger = ConsoleLogger::new();
    bootstrap_logger.info("starting flowline bootstrap");

    bootstrap_logger.debug("parsing command line arguments");
    let cli = match bootstrap_cli() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("flowline: {err}");
            return std::process::ExitCode::from(64);
        }
    };
    bootstrap_logger.debug(&format!("parsed command: {:?}", cli.command));

    let config = match FlowlineConfig::load(cli.settings.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("flowline: {err}");
            return std::process::ExitCode::from(78);
        }
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    flowline::logging::init(&logging);

    if let Some(threads) = config.concurrency.rayon_threads {
        if let Err(err) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
            tracing::warn!(error = %err, "failed to apply configured rayon pool size, using default");
        }
    }

    result_to_exit_code(dispatch(cli.command))
}

fn dispatch(command: ValidatedCommand) -> anyhow::Result<()> {
    match command {
        ValidatedCommand::Describe { pipeline } => describe(&pipeline),
        ValidatedCommand::Run { pipeline, checkpoint_out, max_records } => {
            let mut handle = load_spec(&pipeline)?.build()?;
            let coordinator = ShutdownCoordinator::install_ctrl_c_handler();
            drive(&mut handle, coordinator.token(), max_records, checkpoint_out.as_deref())
        }
        ValidatedCommand::Resume { pipeline, checkpoint_in, checkpoint_out, max_records } => {
            let mut handle = load_spec(&pipeline)?.build()?;
            let bytes = std::fs::read(&checkpoint_in).with_context(|| format!("reading checkpoint {}", checkpoint_in.display()))?;
            let mut tape = Tape::from_bytes(bytes);
            handle.reload_position(&mut tape)?;
            let coordinator = ShutdownCoordinator::install_ctrl_c_handler();
            drive(&mut handle, coordinator.token(), max_records, checkpoint_out.as_deref())
        }
    }
}

fn load_spec(path: &Path) -> anyhow::Result<PipelineSpec> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading pipeline config {}", path.display()))?;
    let spec = if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
        serde_json::from_str(&text).with_context(|| format!("parsing {} as JSON", path.display()))?
    } else {
        serde_yaml::from_str(&text).with_context(|| format!("parsing {} as YAML", path.display()))?
    };
    Ok(spec)
}

fn describe(path: &Path) -> anyhow::Result<()> {
    let spec = load_spec(path)?;
    println!("{}", spec.describe());
    Ok(())
}

/// Drains `handle` one record at a time, printing each as a JSON line,
/// until the pipeline ends, `max_records` is reached, or `cancel` fires.
/// A checkpoint is written on any of the three exits, not only a clean one —
/// the whole point of a checkpoint is to make an interrupted run resumable.
fn drive(
    handle: &mut Pipeline,
    cancel: CancellationToken,
    max_records: Option<u64>,
    checkpoint_out: Option<&Path>,
) -> anyhow::Result<()> {
    let mut emitted: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            tracing::info!(emitted, "stopping early on shutdown request");
            break;
        }
        if max_records.is_some_and(|limit| emitted >= limit) {
            tracing::info!(emitted, "reached max-records limit");
            break;
        }
        match handle.next()? {
            Some(record) => {
                println!("{}", serde_json::to_string(&record)?);
                emitted += 1;
            }
            None => break,
        }
    }

    if let Some(path) = checkpoint_out {
        let mut tape = Tape::new();
        handle.record_position(&mut tape)?;
        std::fs::write(path, tape.into_bytes()).with_context(|| format!("writing checkpoint {}", path.display()))?;
        tracing::info!(path = %path.display(), "checkpoint written");
    }

    Ok(())
}
