//! Read-only diff of a declaration against the remote tree, used for dry runs.

use std::collections::HashSet;

use serde::Serialize;

use crate::binding::{FunctionTarget, HttpVerb, InvokeGrant};
use crate::declaration::ModuleDeclaration;
use crate::path::PathSpec;
use crate::remote::{ApiGateway, RemoteError};
use crate::retry::RetryPolicy;
use crate::tree::ResourceTreeIndex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    CreateResource {
        path: String,
        parent_path: String,
        path_part: String,
    },
    PutMethod {
        path: String,
        verb: HttpVerb,
    },
    PutIntegration {
        path: String,
        verb: HttpVerb,
    },
    /// Grants are always ensured; whether the statement already exists is
    /// only known when it is added.
    EnsureInvokeGrant {
        path: String,
        statement_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanIssue {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReconciliationPlan {
    pub actions: Vec<PlannedAction>,
    pub invalid_paths: Vec<PlanIssue>,
    pub conflicts: Vec<PlanIssue>,
}

impl ReconciliationPlan {
    /// Whether applying the plan would change the API (grants excluded).
    pub fn changes_api(&self) -> bool {
        self.actions
            .iter()
            .any(|action| !matches!(action, PlannedAction::EnsureInvokeGrant { .. }))
    }

    pub fn count_resources(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action, PlannedAction::CreateResource { .. }))
            .count()
    }
}

pub fn build_plan(
    declaration: &ModuleDeclaration,
    index: &ResourceTreeIndex,
    gateway: &(impl ApiGateway + ?Sized),
    api_id: &str,
    target: &FunctionTarget,
    retry: &RetryPolicy,
) -> Result<ReconciliationPlan, RemoteError> {
    let mut plan = ReconciliationPlan::default();
    let mut planned_paths: HashSet<String> = HashSet::new();
    let uri = target.integration_uri();

    for route in &declaration.routes {
        let spec = match PathSpec::parse(&route.path) {
            Ok(spec) => spec,
            Err(error) => {
                plan.invalid_paths.push(PlanIssue {
                    path: route.path.clone(),
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let mut current = Some(index.root().clone());
        let mut walked = String::new();
        for segment in spec.segments() {
            let path_part = segment.path_part();
            let parent_path = if walked.is_empty() {
                "/".to_string()
            } else {
                walked.clone()
            };
            walked = format!("{walked}/{path_part}");

            current = current.and_then(|node| index.lookup(&node.id, &path_part).cloned());
            if current.is_none() && planned_paths.insert(walked.clone()) {
                plan.actions.push(PlannedAction::CreateResource {
                    path: walked.clone(),
                    parent_path,
                    path_part,
                });
            }
        }

        let path = spec.to_string();
        for verb in &route.verbs {
            let state = match &current {
                Some(leaf) => retry.run("get_method", || gateway.get_method(api_id, &leaf.id, *verb))?,
                None => None,
            };
            match state {
                None => {
                    plan.actions.push(PlannedAction::PutMethod {
                        path: path.clone(),
                        verb: *verb,
                    });
                    plan.actions.push(PlannedAction::PutIntegration {
                        path: path.clone(),
                        verb: *verb,
                    });
                }
                Some(state) => match state.integration_uri {
                    None => plan.actions.push(PlannedAction::PutIntegration {
                        path: path.clone(),
                        verb: *verb,
                    }),
                    Some(existing) if existing != uri => plan.conflicts.push(PlanIssue {
                        path: path.clone(),
                        reason: format!("{verb} is integrated with `{existing}`"),
                    }),
                    Some(_) => {}
                },
            }
        }

        plan.actions.push(PlannedAction::EnsureInvokeGrant {
            statement_id: InvokeGrant::for_route(target, api_id, &spec).statement_id,
            path,
        });
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::RouteDeclaration;
    use crate::testing::InMemoryApiGateway;

    fn target() -> FunctionTarget {
        FunctionTarget::from_arn("arn:aws:lambda:us-east-1:123456789012:function:project-users")
            .expect("arn should parse")
    }

    fn get_routes(paths: &[&str]) -> ModuleDeclaration {
        ModuleDeclaration::new(
            "users",
            "project-users",
            paths
                .iter()
                .map(|path| RouteDeclaration {
                    path: path.to_string(),
                    verbs: vec![HttpVerb::Get],
                })
                .collect(),
        )
    }

    fn plan_for(gateway: &InMemoryApiGateway, api_id: &str, paths: &[&str]) -> ReconciliationPlan {
        let retry = RetryPolicy::immediate(1);
        let index = ResourceTreeIndex::build(gateway, api_id, &retry).expect("index should build");
        build_plan(&get_routes(paths), &index, gateway, api_id, &target(), &retry)
            .expect("plan should build")
    }

    #[test]
    fn shared_prefix_is_planned_once() {
        let gateway = InMemoryApiGateway::new();
        let api_id = gateway.add_api("MainApiGateway");

        let plan = plan_for(&gateway, &api_id, &["/a/b", "/a/c", "a"]);

        let created: Vec<&str> = plan
            .actions
            .iter()
            .filter_map(|action| match action {
                PlannedAction::CreateResource { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(created, vec!["/a", "/a/b", "/a/c"]);
        assert_eq!(plan.invalid_paths.len(), 1);
        assert_eq!(plan.invalid_paths[0].path, "a");
        assert!(plan.changes_api());
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn method_without_integration_plans_only_the_integration() {
        let gateway = InMemoryApiGateway::new();
        let api_id = gateway.add_api("MainApiGateway");
        gateway.seed_method(&api_id, "/users", HttpVerb::Get, None);

        let plan = plan_for(&gateway, &api_id, &["/users"]);

        assert_eq!(plan.count_resources(), 0);
        assert_eq!(
            plan.actions[0],
            PlannedAction::PutIntegration {
                path: "/users".to_string(),
                verb: HttpVerb::Get,
            }
        );
        assert!(matches!(
            plan.actions[1],
            PlannedAction::EnsureInvokeGrant { .. }
        ));
        assert_eq!(plan.actions.len(), 2);
    }

    #[test]
    fn converged_route_only_ensures_its_grant() {
        let gateway = InMemoryApiGateway::new();
        let api_id = gateway.add_api("MainApiGateway");
        let uri = target().integration_uri();
        gateway.seed_method(&api_id, "/users/{id}", HttpVerb::Get, Some(uri.as_str()));

        let plan = plan_for(&gateway, &api_id, &["/users/{id}"]);

        assert!(!plan.changes_api());
        assert!(plan.conflicts.is_empty());
        assert_eq!(plan.actions.len(), 1);
    }
}
