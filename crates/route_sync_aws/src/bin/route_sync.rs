use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use route_sync_aws::adapters::{AwsApiGateway, AwsContext, AwsFunctionDirectory};
use route_sync_aws::cli::Cli;
use route_sync_aws::observability::init_tracing;
use route_sync_aws::summary::render;
use route_sync_core::{RunController, RunMode, RunSummary};

const FATAL_EXIT: u8 = 1;

fn run(cli: &Cli) -> anyhow::Result<RunSummary> {
    let config = cli.run_config(Utc::now());
    let context = if config.mode == RunMode::ValidateOnly {
        AwsContext::offline()
    } else {
        AwsContext::load(cli.region.clone())
    }
    .context("failed to initialise AWS SDK")?;
    let gateway = AwsApiGateway::new(&context);
    let functions = AwsFunctionDirectory::new(&context);

    let summary = RunController::new(&gateway, &functions)
        .run(&config)
        .with_context(|| format!("route sync for module `{}` failed", config.module))?;
    Ok(summary)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    tracing::info!(
        component = "route_sync",
        event = "run_started",
        module = %cli.module,
        stage = %cli.stage,
        dry_run = cli.mode() == RunMode::DryRun,
        validate_only = cli.mode() == RunMode::ValidateOnly,
    );

    match run(&cli) {
        Ok(summary) => {
            print!("{}", render(&summary));
            tracing::info!(
                component = "route_sync",
                event = "run_finished",
                status = ?summary.status,
            );
            ExitCode::from(summary.status.exit_code() as u8)
        }
        Err(error) => {
            tracing::error!(
                component = "route_sync",
                event = "run_failed",
                error = %format!("{error:#}"),
            );
            eprintln!("error: {error:#}");
            ExitCode::from(FATAL_EXIT)
        }
    }
}
