//! One reconciliation run for one module and stage.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::binding::FunctionTarget;
use crate::declaration::{ConfigError, ModuleDeclaration};
use crate::deployer::{DeployResult, Deployer, DEFAULT_DEPLOY_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::path::parse_path;
use crate::plan::{build_plan, PlanIssue, ReconciliationPlan};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::remote::{ApiGateway, FunctionDirectory, RemoteError, RestApiSummary};
use crate::retry::RetryPolicy;
use crate::tree::{ResourceTreeIndex, TreeError};

pub const DEFAULT_API_NAME: &str = "MainApiGateway";
pub const DEFAULT_FUNCTION_PREFIX: &str = "project-";
pub const DEFAULT_STAGE: &str = "prod";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Apply,
    /// Read remote state and report what would change.
    DryRun,
    /// Load and check the declaration without any remote call.
    ValidateOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub module: String,
    pub stage: String,
    pub api_name: String,
    pub function_name: String,
    pub modules_dir: PathBuf,
    pub mode: RunMode,
    pub force_deploy: bool,
    pub deploy_timeout: Duration,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub deployment_description: Option<String>,
}

impl RunConfig {
    pub fn new(module: impl Into<String>, stage: impl Into<String>) -> Self {
        let module = module.into();
        Self {
            function_name: default_function_name(DEFAULT_FUNCTION_PREFIX, &module),
            module,
            stage: stage.into(),
            api_name: DEFAULT_API_NAME.to_string(),
            modules_dir: PathBuf::from("modules"),
            mode: RunMode::Apply,
            force_deploy: false,
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
            deployment_description: None,
        }
    }
}

pub fn default_function_name(prefix: &str, module: &str) -> String {
    format!("{prefix}{module}")
}

/// China regions are served from the `amazonaws.com.cn` domain.
pub fn invoke_url(api_id: &str, region: &str, stage: &str) -> String {
    let domain = if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    format!("https://{api_id}.execute-api.{region}.{domain}/{stage}")
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("ApiNotFound: no REST API named `{name}`")]
    ApiNotFound { name: String },
    #[error("ApiAmbiguous: {} REST APIs are named `{name}` ({})", .ids.len(), .ids.join(", "))]
    ApiAmbiguous { name: String, ids: Vec<String> },
    #[error("failed to resolve function `{name}`: {source}")]
    Function {
        name: String,
        #[source]
        source: RemoteError,
    },
    #[error("failed to list REST APIs: {0}")]
    ApiListing(#[source] RemoteError),
    #[error("failed to read resource tree: {0}")]
    Tree(#[from] TreeError),
    #[error("failed to plan reconciliation: {0}")]
    Plan(#[source] RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failure,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::PartialFailure => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub module: String,
    pub stage: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub routes_declared: usize,
    pub health_route_declared: bool,
    pub api_id: Option<String>,
    pub function_arn: Option<String>,
    pub invoke_url: Option<String>,
    pub plan: Option<ReconciliationPlan>,
    pub report: Option<ReconcileReport>,
    pub deployment: Option<DeployResult>,
    pub deploy_error: Option<String>,
}

impl RunSummary {
    fn new(config: &RunConfig, declaration: &ModuleDeclaration) -> Self {
        Self {
            module: config.module.clone(),
            stage: config.stage.clone(),
            mode: config.mode,
            status: RunStatus::Success,
            routes_declared: declaration.routes.len(),
            health_route_declared: declaration.has_health_route(),
            api_id: None,
            function_arn: None,
            invoke_url: None,
            plan: None,
            report: None,
            deployment: None,
            deploy_error: None,
        }
    }

    fn settle_status(&mut self) {
        let mut status = RunStatus::Success;
        if let Some(report) = &self.report {
            if report.has_failures() {
                status = if report.converged_count() == 0 {
                    RunStatus::Failure
                } else {
                    RunStatus::PartialFailure
                };
            }
        }
        if let Some(plan) = &self.plan {
            if !plan.invalid_paths.is_empty() || !plan.conflicts.is_empty() {
                status = RunStatus::PartialFailure;
            }
        }
        if self.deploy_error.is_some() && status == RunStatus::Success {
            status = RunStatus::PartialFailure;
        }
        self.status = status;
    }
}

pub struct RunController<'a, G: ?Sized, F: ?Sized> {
    gateway: &'a G,
    functions: &'a F,
}

impl<'a, G, F> RunController<'a, G, F>
where
    G: ApiGateway + ?Sized,
    F: FunctionDirectory + ?Sized,
{
    pub fn new(gateway: &'a G, functions: &'a F) -> Self {
        Self { gateway, functions }
    }

    /// Loads the declaration before any remote call, so a bad declaration
    /// never touches the API. Errors returned here are fatal for the run;
    /// per-path and deployment failures are carried in the summary instead.
    pub fn run(&self, config: &RunConfig) -> Result<RunSummary, RunError> {
        let declaration =
            ModuleDeclaration::load(&config.modules_dir, &config.module, &config.function_name)?;
        let mut summary = RunSummary::new(config, &declaration);
        tracing::info!(
            component = "run_controller",
            event = "declaration_loaded",
            module = %config.module,
            stage = %config.stage,
            routes = declaration.routes.len(),
        );
        if !summary.health_route_declared {
            tracing::warn!(
                component = "run_controller",
                event = "health_route_missing",
                module = %config.module,
                expected = %declaration.health_route(),
            );
        }
        if config.mode == RunMode::ValidateOnly {
            summary.plan = Some(validate_paths(&declaration));
            summary.settle_status();
            return Ok(summary);
        }

        let api = self.resolve_api(&config.api_name, &config.retry)?;
        let target = self.resolve_function(&config.function_name, &config.retry)?;
        summary.api_id = Some(api.id.clone());
        summary.function_arn = Some(target.arn.clone());
        tracing::info!(
            component = "run_controller",
            event = "targets_resolved",
            api_id = %api.id,
            function_arn = %target.arn,
        );

        let mut index = ResourceTreeIndex::build(self.gateway, &api.id, &config.retry)?;

        if config.mode == RunMode::DryRun {
            let plan = build_plan(
                &declaration,
                &index,
                self.gateway,
                &api.id,
                &target,
                &config.retry,
            )
            .map_err(RunError::Plan)?;
            summary.plan = Some(plan);
            summary.settle_status();
            return Ok(summary);
        }

        let reconciler = Reconciler::new(
            self.gateway,
            self.functions,
            &api.id,
            &target,
            &config.retry,
        );
        let report = reconciler.reconcile(&declaration, &mut index);

        let deployer = Deployer::new(
            self.gateway,
            &config.retry,
            config.deploy_timeout,
            config.poll_interval,
        );
        let description = config.deployment_description.clone().unwrap_or_else(|| {
            format!("route_sync module={} stage={}", config.module, config.stage)
        });
        let changed = report.changed() || config.force_deploy;
        match deployer.deploy_if_changed(&api.id, &config.stage, changed, &description) {
            Ok(result) => summary.deployment = Some(result),
            Err(error) => {
                tracing::warn!(
                    component = "run_controller",
                    event = "deployment_failed",
                    stage = %config.stage,
                    error = %error,
                );
                summary.deploy_error = Some(error.to_string());
            }
        }

        summary.invoke_url = Some(invoke_url(&api.id, &target.region, &config.stage));
        summary.report = Some(report);
        summary.settle_status();
        Ok(summary)
    }

    fn resolve_api(&self, name: &str, retry: &RetryPolicy) -> Result<RestApiSummary, RunError> {
        let mut matches = Vec::new();
        let mut position: Option<String> = None;
        loop {
            let page = retry
                .run("get_rest_apis", || {
                    self.gateway.get_rest_apis(position.as_deref())
                })
                .map_err(RunError::ApiListing)?;
            matches.extend(page.items.into_iter().filter(|api| api.name == name));
            match page.next_position {
                Some(next) if Some(&next) != position.as_ref() => position = Some(next),
                _ => break,
            }
        }

        match matches.len() {
            0 => Err(RunError::ApiNotFound {
                name: name.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(RunError::ApiAmbiguous {
                name: name.to_string(),
                ids: matches.into_iter().map(|api| api.id).collect(),
            }),
        }
    }

    fn resolve_function(&self, name: &str, retry: &RetryPolicy) -> Result<FunctionTarget, RunError> {
        retry
            .run("get_function", || self.functions.resolve_function(name))
            .map_err(|source| RunError::Function {
                name: name.to_string(),
                source,
            })
    }
}

/// Syntax-only plan used by validate-only runs.
fn validate_paths(declaration: &ModuleDeclaration) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();
    for route in &declaration.routes {
        if let Err(error) = parse_path(&route.path) {
            plan.invalid_paths.push(PlanIssue {
                path: route.path.clone(),
                reason: error.to_string(),
            });
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_module_naming_convention() {
        let config = RunConfig::new("users", "dev");

        assert_eq!(config.function_name, "project-users");
        assert_eq!(config.api_name, "MainApiGateway");
        assert_eq!(config.mode, RunMode::Apply);
        assert!(!config.force_deploy);
    }

    #[test]
    fn exit_codes_distinguish_partial_failure() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_eq!(RunStatus::Failure.exit_code(), 1);
        assert_eq!(RunStatus::PartialFailure.exit_code(), 2);
    }

    #[test]
    fn builds_stage_invoke_url() {
        assert_eq!(
            invoke_url("abc123", "us-east-1", "prod"),
            "https://abc123.execute-api.us-east-1.amazonaws.com/prod"
        );
        assert_eq!(
            invoke_url("abc123", "cn-north-1", "prod"),
            "https://abc123.execute-api.cn-north-1.amazonaws.com.cn/prod"
        );
    }

    #[test]
    fn validate_only_plan_lists_bad_paths() {
        let declaration =
            ModuleDeclaration::with_paths("users", "project-users", &["/users", "users", "/a//b"]);
        let plan = validate_paths(&declaration);

        assert_eq!(plan.invalid_paths.len(), 2);
        assert!(plan.actions.is_empty());
    }
}
