//! Converges the remote resource tree to contain every declared route.
//!
//! Every mutation is an optimistic create that treats "already exists" as
//! success, so runs for different modules may interleave freely against the
//! same tree. Nothing is rolled back: partial progress is picked up by the
//! next run.

use serde::Serialize;
use thiserror::Error;

use crate::binding::{FunctionTarget, HttpVerb, InvokeGrant, MethodState};
use crate::declaration::{ModuleDeclaration, RouteDeclaration};
use crate::path::{ParseError, PathSpec};
use crate::remote::{ApiGateway, FunctionDirectory, RemoteError, RemoteErrorKind};
use crate::retry::RetryPolicy;
use crate::tree::{ResourceNode, ResourceTreeIndex, TreeError};

#[derive(Debug, Error)]
pub enum PathError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(
        "creating `{path_part}` under `{parent_path}` conflicted but no such resource exists after re-reading the tree: {message}"
    )]
    UnresolvedConflict {
        parent_path: String,
        path_part: String,
        message: String,
    },
    #[error(
        "`{operation}` for {verb} {path} conflicted but re-reading the method does not show the change: {message}"
    )]
    UnconfirmedConflict {
        operation: &'static str,
        path: String,
        verb: HttpVerb,
        message: String,
    },
    #[error("{verb} {path} is integrated with `{existing}`, which is not this module's function")]
    ForeignIntegration {
        path: String,
        verb: HttpVerb,
        existing: String,
    },
}

impl PathError {
    fn is_access_denied(&self) -> bool {
        match self {
            Self::Remote(error) | Self::Tree(TreeError::Remote(error)) => {
                error.kind == RemoteErrorKind::AccessDenied
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PathStatus {
    Converged,
    Failed { errors: Vec<String> },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathOutcome {
    pub path: String,
    #[serde(flatten)]
    pub status: PathStatus,
}

impl PathOutcome {
    pub fn is_converged(&self) -> bool {
        self.status == PathStatus::Converged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedResource {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodRef {
    pub path: String,
    pub resource_id: String,
    pub verb: HttpVerb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PresentCounts {
    pub resources: usize,
    pub methods: usize,
    pub integrations: usize,
    pub grants: usize,
}

impl PresentCounts {
    pub fn total(&self) -> usize {
        self.resources + self.methods + self.integrations + self.grants
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReconcileReport {
    pub outcomes: Vec<PathOutcome>,
    pub created_resources: Vec<CreatedResource>,
    pub created_methods: Vec<MethodRef>,
    pub created_integrations: Vec<MethodRef>,
    pub created_grants: Vec<String>,
    pub already_present: PresentCounts,
}

impl ReconcileReport {
    /// True when the API itself changed and needs a new deployment.
    /// Invoke grants live on the function and take effect without one.
    pub fn changed(&self) -> bool {
        !self.created_resources.is_empty()
            || !self.created_methods.is_empty()
            || !self.created_integrations.is_empty()
    }

    pub fn created_total(&self) -> usize {
        self.created_resources.len()
            + self.created_methods.len()
            + self.created_integrations.len()
            + self.created_grants.len()
    }

    pub fn converged_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_converged()).count()
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &PathOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_converged())
    }

    pub fn has_failures(&self) -> bool {
        self.unresolved().next().is_some()
    }
}

pub struct Reconciler<'a, G: ?Sized, F: ?Sized> {
    gateway: &'a G,
    functions: &'a F,
    api_id: &'a str,
    target: &'a FunctionTarget,
    retry: &'a RetryPolicy,
}

impl<'a, G, F> Reconciler<'a, G, F>
where
    G: ApiGateway + ?Sized,
    F: FunctionDirectory + ?Sized,
{
    pub fn new(
        gateway: &'a G,
        functions: &'a F,
        api_id: &'a str,
        target: &'a FunctionTarget,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            functions,
            api_id,
            target,
            retry,
        }
    }

    pub fn reconcile(
        &self,
        declaration: &ModuleDeclaration,
        index: &mut ResourceTreeIndex,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut abort_reason: Option<String> = None;

        for route in &declaration.routes {
            if let Some(reason) = &abort_reason {
                report.outcomes.push(PathOutcome {
                    path: route.path.clone(),
                    status: PathStatus::Skipped {
                        reason: reason.clone(),
                    },
                });
                continue;
            }

            let errors = self.reconcile_route(route, index, &mut report);
            let status = if errors.is_empty() {
                PathStatus::Converged
            } else {
                if let Some(denied) = errors.iter().find(|error| error.is_access_denied()) {
                    abort_reason = Some(format!("aborted after access denied: {denied}"));
                }
                for error in &errors {
                    tracing::warn!(
                        component = "reconciler",
                        event = "path_failed",
                        module = %declaration.module,
                        path = %route.path,
                        error = %error,
                    );
                }
                PathStatus::Failed {
                    errors: errors.iter().map(ToString::to_string).collect(),
                }
            };
            report.outcomes.push(PathOutcome {
                path: route.path.clone(),
                status,
            });
        }

        tracing::info!(
            component = "reconciler",
            event = "reconcile_completed",
            module = %declaration.module,
            paths = report.outcomes.len(),
            converged = report.converged_count(),
            created = report.created_total(),
            already_present = report.already_present.total(),
        );
        report
    }

    fn reconcile_route(
        &self,
        route: &RouteDeclaration,
        index: &mut ResourceTreeIndex,
        report: &mut ReconcileReport,
    ) -> Vec<PathError> {
        let spec = match PathSpec::parse(&route.path) {
            Ok(spec) => spec,
            Err(error) => return vec![error.into()],
        };

        let leaf = match self.ensure_path(&spec, index, report) {
            Ok(leaf) => leaf,
            Err(error) => return vec![error],
        };

        let mut errors = Vec::new();
        for verb in &route.verbs {
            if let Err(error) = self.ensure_method(&leaf, *verb, report) {
                let denied = error.is_access_denied();
                errors.push(error);
                if denied {
                    return errors;
                }
            }
        }

        if let Err(error) = self.ensure_grant(&spec, report) {
            errors.push(error);
        }
        errors
    }

    fn ensure_path(
        &self,
        spec: &PathSpec,
        index: &mut ResourceTreeIndex,
        report: &mut ReconcileReport,
    ) -> Result<ResourceNode, PathError> {
        let mut current = index.root().clone();
        for segment in spec.segments() {
            current = self.ensure_child(&current, &segment.path_part(), index, report)?;
        }
        Ok(current)
    }

    fn ensure_child(
        &self,
        parent: &ResourceNode,
        path_part: &str,
        index: &mut ResourceTreeIndex,
        report: &mut ReconcileReport,
    ) -> Result<ResourceNode, PathError> {
        if let Some(existing) = index.lookup(&parent.id, path_part) {
            report.already_present.resources += 1;
            return Ok(existing.clone());
        }

        let created = self.retry.run("create_resource", || {
            self.gateway
                .create_resource(self.api_id, &parent.id, path_part)
        });

        match created {
            Ok(node) => {
                tracing::info!(
                    component = "reconciler",
                    event = "resource_created",
                    resource_id = %node.id,
                    path = %node.path,
                );
                index.insert(node.clone())?;
                report.created_resources.push(CreatedResource {
                    id: node.id.clone(),
                    path: node.path.clone(),
                });
                Ok(node)
            }
            Err(error) if error.is_conflict() => {
                tracing::info!(
                    component = "reconciler",
                    event = "resource_create_raced",
                    parent_path = %parent.path,
                    path_part,
                    error = %error,
                );
                index.refresh(self.gateway, self.api_id, self.retry)?;
                match index.lookup(&parent.id, path_part) {
                    Some(existing) => {
                        report.already_present.resources += 1;
                        Ok(existing.clone())
                    }
                    None => Err(PathError::UnresolvedConflict {
                        parent_path: parent.path.clone(),
                        path_part: path_part.to_string(),
                        message: error.message,
                    }),
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    fn get_method(
        &self,
        leaf: &ResourceNode,
        verb: HttpVerb,
    ) -> Result<Option<MethodState>, RemoteError> {
        self.retry.run("get_method", || {
            self.gateway.get_method(self.api_id, &leaf.id, verb)
        })
    }

    fn ensure_method(
        &self,
        leaf: &ResourceNode,
        verb: HttpVerb,
        report: &mut ReconcileReport,
    ) -> Result<(), PathError> {
        let method_ref = || MethodRef {
            path: leaf.path.clone(),
            resource_id: leaf.id.clone(),
            verb,
        };

        let state = match self.get_method(leaf, verb)? {
            Some(state) => {
                report.already_present.methods += 1;
                state
            }
            None => {
                let put = self.retry.run("put_method", || {
                    self.gateway.put_method(self.api_id, &leaf.id, verb)
                });
                match put {
                    Ok(()) => {
                        tracing::info!(
                            component = "reconciler",
                            event = "method_created",
                            path = %leaf.path,
                            verb = %verb,
                        );
                        report.created_methods.push(method_ref());
                        MethodState::default()
                    }
                    Err(error) if error.is_conflict() => match self.get_method(leaf, verb)? {
                        Some(state) => {
                            report.already_present.methods += 1;
                            state
                        }
                        None => {
                            return Err(PathError::UnconfirmedConflict {
                                operation: "put_method",
                                path: leaf.path.clone(),
                                verb,
                                message: error.message,
                            })
                        }
                    },
                    Err(error) => return Err(error.into()),
                }
            }
        };

        let uri = self.target.integration_uri();
        match state.integration_uri {
            Some(existing) if existing == uri => {
                report.already_present.integrations += 1;
                Ok(())
            }
            Some(existing) => Err(PathError::ForeignIntegration {
                path: leaf.path.clone(),
                verb,
                existing,
            }),
            None => {
                let put = self.retry.run("put_integration", || {
                    self.gateway
                        .put_integration(self.api_id, &leaf.id, verb, &uri)
                });
                match put {
                    Ok(()) => {
                        tracing::info!(
                            component = "reconciler",
                            event = "integration_created",
                            path = %leaf.path,
                            verb = %verb,
                            function = %self.target.name,
                        );
                        report.created_integrations.push(method_ref());
                        Ok(())
                    }
                    Err(error) if error.is_conflict() => {
                        let confirmed = self
                            .get_method(leaf, verb)?
                            .and_then(|state| state.integration_uri);
                        match confirmed {
                            Some(existing) if existing == uri => {
                                report.already_present.integrations += 1;
                                Ok(())
                            }
                            Some(existing) => Err(PathError::ForeignIntegration {
                                path: leaf.path.clone(),
                                verb,
                                existing,
                            }),
                            None => Err(PathError::UnconfirmedConflict {
                                operation: "put_integration",
                                path: leaf.path.clone(),
                                verb,
                                message: error.message,
                            }),
                        }
                    }
                    Err(error) => Err(error.into()),
                }
            }
        }
    }

    fn ensure_grant(&self, spec: &PathSpec, report: &mut ReconcileReport) -> Result<(), PathError> {
        let grant = InvokeGrant::for_route(self.target, self.api_id, spec);
        let added = self.retry.run("add_permission", || {
            self.functions.add_invoke_permission(&grant)
        });
        match added {
            Ok(()) => {
                tracing::info!(
                    component = "reconciler",
                    event = "invoke_permission_added",
                    statement_id = %grant.statement_id,
                    source_arn = %grant.source_arn,
                );
                report.created_grants.push(grant.statement_id);
                Ok(())
            }
            Err(error) if error.is_conflict() => {
                report.already_present.grants += 1;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }
}
