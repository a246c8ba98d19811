/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use colored::Colorize;
use instant_io::{
    clap_args::{self, Commands},
    config::WorkloadConfig,
    executor::ProcessExecutor,
    logging,
    object_store::s3::S3Connector,
    orchestrator::Orchestrator,
    run_context::{RunContext, RunId},
};
use std::{fs, process::ExitCode, sync::Arc};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = clap_args::parse();

    match args.command {
        Commands::Init { path } => {
            WorkloadConfig::write_example_to_file(&path)?;
            println!("> example config written to {}", path.display().to_string().green());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run {
            config,
            output_dir,
            dry_run,
        } => {
            let mut workload = WorkloadConfig::load(&config)?;
            if let Some(output_dir) = output_dir {
                workload.output_dir = output_dir;
            }

            let use_sudo = workload.use_sudo;
            let command_timeout = workload.command_timeout();
            let ctx = RunContext::new(RunId::now(), workload);
            let orchestrator = Orchestrator::new(
                ctx.clone(),
                Arc::new(ProcessExecutor::new(use_sudo, command_timeout)),
                Arc::new(S3Connector),
            );

            if dry_run {
                println!("{}", " Plan ".reversed().green());
                let plan = orchestrator.plan();
                if plan.is_empty() {
                    println!("No drivers are triggered in {}", config.display());
                }
                for line in plan {
                    println!("{}", line);
                }
                return Ok(ExitCode::SUCCESS);
            }

            fs::create_dir_all(ctx.output_dir()).context(format!(
                "Unable to create output directory {}",
                ctx.output_dir().display()
            ))?;
            logging::init(&ctx, args.verbose)?;
            info!("Starting run {} with config {}", ctx.run_id, config.display());

            let summary = orchestrator.run().await;
            summary.print();
            Ok(summary.exit_code())
        }
    }
}
