/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::run_context::RunContext;
use anyhow::Context;
use std::{fs::File, sync::Mutex};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directive used when `RUST_LOG` is unset. Third-party crates (the AWS SDK in particular) stay
/// at warn so debug output is about the workload.
pub fn default_directive(level: Level) -> String {
    format!("warn,instant_io={}", level.as_str().to_lowercase())
}

/// Installs the global subscriber: coloured output on the console and the same events,
/// without colour codes, in the run's log file.
pub fn init(ctx: &RunContext, verbose: bool) -> anyhow::Result<()> {
    let level = match verbose {
        true => Level::DEBUG,
        false => ctx.config.log_level()?,
    };

    let log_file = ctx.log_file();
    let file = File::create(&log_file)
        .context(format!("Unable to create log file {}", log_file.display()))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("Failed to set global default subscriber")?;

    info!("Logging to {}", log_file.display());
    Ok(())
}
