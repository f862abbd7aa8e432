//! Human-readable run summary printed on stdout.

use std::fmt::Write;

use route_sync_core::deployer::DeployResult;
use route_sync_core::plan::{PlannedAction, ReconciliationPlan};
use route_sync_core::reconciler::{PathStatus, ReconcileReport};
use route_sync_core::{RunMode, RunStatus, RunSummary};

pub fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    let mode = match summary.mode {
        RunMode::Apply => "apply",
        RunMode::DryRun => "dry-run",
        RunMode::ValidateOnly => "validate-only",
    };
    let _ = writeln!(
        out,
        "route_sync {mode}: module={} stage={} routes={}",
        summary.module, summary.stage, summary.routes_declared
    );
    if let Some(api_id) = &summary.api_id {
        let _ = writeln!(out, "  api: {api_id}");
    }
    if let Some(arn) = &summary.function_arn {
        let _ = writeln!(out, "  function: {arn}");
    }
    if !summary.health_route_declared {
        let _ = writeln!(out, "  warning: no /_health/{} route declared", summary.module);
    }

    if let Some(plan) = &summary.plan {
        render_plan(&mut out, plan);
    }
    if let Some(report) = &summary.report {
        render_report(&mut out, report);
    }

    match (&summary.deployment, &summary.deploy_error) {
        (_, Some(error)) => {
            let _ = writeln!(out, "deployment: failed: {error}");
        }
        (Some(DeployResult::Deployed { deployment_id, .. }), None) => {
            let _ = writeln!(out, "deployment: {deployment_id}");
        }
        (Some(DeployResult::Skipped), None) => {
            let _ = writeln!(out, "deployment: skipped (no changes)");
        }
        (None, None) => {}
    }
    if let Some(url) = &summary.invoke_url {
        let _ = writeln!(out, "invoke url: {url}");
    }

    let status = match summary.status {
        RunStatus::Success => "success",
        RunStatus::PartialFailure => "partial failure",
        RunStatus::Failure => "failure",
    };
    let _ = writeln!(out, "status: {status}");
    out
}

fn render_plan(out: &mut String, plan: &ReconciliationPlan) {
    let _ = writeln!(out, "planned changes: {}", plan.actions.len());
    for action in &plan.actions {
        let line = match action {
            PlannedAction::CreateResource { path, .. } => format!("create resource {path}"),
            PlannedAction::PutMethod { path, verb } => format!("put method {verb} {path}"),
            PlannedAction::PutIntegration { path, verb } => {
                format!("put integration {verb} {path}")
            }
            PlannedAction::EnsureInvokeGrant { path, .. } => format!("ensure invoke grant {path}"),
        };
        let _ = writeln!(out, "  + {line}");
    }
    for issue in &plan.invalid_paths {
        let _ = writeln!(out, "  ! invalid {}: {}", issue.path, issue.reason);
    }
    for issue in &plan.conflicts {
        let _ = writeln!(out, "  ! conflict {}: {}", issue.path, issue.reason);
    }
}

fn render_report(out: &mut String, report: &ReconcileReport) {
    let present = &report.already_present;
    let _ = writeln!(
        out,
        "created: {} resources, {} methods, {} integrations, {} grants",
        report.created_resources.len(),
        report.created_methods.len(),
        report.created_integrations.len(),
        report.created_grants.len()
    );
    let _ = writeln!(
        out,
        "already present: {} resources, {} methods, {} integrations, {} grants",
        present.resources, present.methods, present.integrations, present.grants
    );
    for outcome in &report.outcomes {
        match &outcome.status {
            PathStatus::Converged => {
                let _ = writeln!(out, "  ok      {}", outcome.path);
            }
            PathStatus::Failed { errors } => {
                let _ = writeln!(out, "  failed  {}", outcome.path);
                for error in errors {
                    let _ = writeln!(out, "          {error}");
                }
            }
            PathStatus::Skipped { reason } => {
                let _ = writeln!(out, "  skipped {} ({reason})", outcome.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use route_sync_core::reconciler::{CreatedResource, PathOutcome};
    use route_sync_core::RunConfig;

    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            module: "users".to_string(),
            stage: "prod".to_string(),
            mode: RunMode::Apply,
            status: RunStatus::PartialFailure,
            routes_declared: 2,
            health_route_declared: false,
            api_id: Some("abc123".to_string()),
            function_arn: None,
            invoke_url: Some("https://abc123.execute-api.us-east-1.amazonaws.com/prod".to_string()),
            plan: None,
            report: Some(ReconcileReport {
                outcomes: vec![
                    PathOutcome {
                        path: "/users".to_string(),
                        status: PathStatus::Converged,
                    },
                    PathOutcome {
                        path: "users".to_string(),
                        status: PathStatus::Failed {
                            errors: vec!["path `users` must start with `/`".to_string()],
                        },
                    },
                ],
                created_resources: vec![CreatedResource {
                    id: "r1".to_string(),
                    path: "/users".to_string(),
                }],
                ..ReconcileReport::default()
            }),
            deployment: Some(DeployResult::Deployed {
                deployment_id: "dep9".to_string(),
                confirmed_after_ms: 10,
            }),
            deploy_error: None,
        }
    }

    #[test]
    fn renders_counts_outcomes_and_url() {
        let text = render(&summary());

        assert!(text.contains("created: 1 resources, 0 methods, 0 integrations, 0 grants"));
        assert!(text.contains("  ok      /users"));
        assert!(text.contains("  failed  users"));
        assert!(text.contains("deployment: dep9"));
        assert!(text.contains("invoke url: https://abc123.execute-api.us-east-1.amazonaws.com/prod"));
        assert!(text.contains("warning: no /_health/users route declared"));
        assert!(text.ends_with("status: partial failure\n"));
    }

    #[test]
    fn deploy_error_takes_precedence() {
        let mut summary = summary();
        summary.deployment = None;
        summary.deploy_error = Some("DeployTimeout: stage `prod` did not switch".to_string());

        assert!(render(&summary).contains("deployment: failed: DeployTimeout"));
    }

    #[test]
    fn header_names_mode() {
        let config = RunConfig::new("orders", "dev");
        let mut summary = summary();
        summary.mode = RunMode::DryRun;
        summary.module = config.module;
        summary.stage = config.stage;

        assert!(render(&summary).starts_with("route_sync dry-run: module=orders stage=dev routes=2\n"));
    }
}
