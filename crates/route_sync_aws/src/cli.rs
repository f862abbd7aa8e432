use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use route_sync_core::controller::{
    default_function_name, DEFAULT_API_NAME, DEFAULT_FUNCTION_PREFIX, DEFAULT_STAGE,
};
use route_sync_core::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use route_sync_core::{RunConfig, RunMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "route_sync",
    about = "Reconcile a module's declared routes into the shared REST API",
    long_about = "Reads modules/<module>/config.json, creates any missing resources,\n\
                  methods, proxy integrations and invoke permissions on the shared\n\
                  API, and deploys the stage when something changed.\n\n\
                  Exit status: 0 success, 1 fatal failure, 2 partial failure."
)]
pub struct Cli {
    /// Module whose declaration is reconciled
    #[arg(long)]
    pub module: String,
    /// Stage to deploy
    #[arg(long, env = "STAGE", default_value = DEFAULT_STAGE)]
    pub stage: String,
    /// Display name of the shared REST API
    #[arg(long, env = "ROUTE_SYNC_API_NAME", default_value = DEFAULT_API_NAME)]
    pub api_name: String,
    /// Prefix joined with the module name to form the function name
    #[arg(long, default_value = DEFAULT_FUNCTION_PREFIX)]
    pub lambda_name_prefix: String,
    /// Function name, overriding `<prefix><module>`
    #[arg(long)]
    pub function_name: Option<String>,
    /// Directory holding one sub-directory per module
    #[arg(long, env = "ROUTE_SYNC_MODULES_DIR", default_value = "modules")]
    pub modules_dir: PathBuf,
    /// Read remote state and print the plan without changing anything
    #[arg(long, conflicts_with = "validate_only")]
    pub dry_run: bool,
    /// Check the declaration only; makes no AWS calls
    #[arg(long)]
    pub validate_only: bool,
    /// Deploy the stage even when nothing changed
    #[arg(long)]
    pub force_deploy: bool,
    /// How long to wait for the stage to switch to a new deployment
    #[arg(long, default_value_t = 60)]
    pub deploy_timeout_secs: u64,
    /// Interval between stage polls
    #[arg(long, default_value_t = 2000)]
    pub poll_interval_ms: u64,
    /// Attempts per remote call for throttled or transient failures
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
    /// AWS region; defaults to the provider chain
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        if self.validate_only {
            RunMode::ValidateOnly
        } else if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Apply
        }
    }

    pub fn run_config(&self, now: DateTime<Utc>) -> RunConfig {
        let mut config = RunConfig::new(&self.module, &self.stage);
        config.api_name = self.api_name.clone();
        config.function_name = self
            .function_name
            .clone()
            .unwrap_or_else(|| default_function_name(&self.lambda_name_prefix, &self.module));
        config.modules_dir = self.modules_dir.clone();
        config.mode = self.mode();
        config.force_deploy = self.force_deploy;
        config.deploy_timeout = Duration::from_secs(self.deploy_timeout_secs);
        config.poll_interval = Duration::from_millis(self.poll_interval_ms);
        config.retry = RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        };
        config.deployment_description = Some(format!(
            "route_sync module={} stage={} at {}",
            self.module,
            self.stage,
            now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ));
        config
    }
}
