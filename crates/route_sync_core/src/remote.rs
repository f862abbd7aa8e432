//! Seams to the hosting system.
//!
//! The reconciler only talks to the outside world through [`ApiGateway`] and
//! [`FunctionDirectory`]. Both are synchronous: a run is a blocking sequence of
//! remote calls, and adapters that wrap async SDKs block on each call.

use std::fmt;

use thiserror::Error;

use crate::binding::{FunctionTarget, HttpVerb, InvokeGrant, MethodState};
use crate::tree::ResourceNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// The thing being created already exists.
    Conflict,
    NotFound,
    Throttled,
    Transient,
    Validation,
    AccessDenied,
    Other,
}

impl RemoteErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Throttled | Self::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::Transient => "transient",
            Self::Validation => "validation",
            Self::AccessDenied => "access_denied",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub operation: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(
        kind: RemoteErrorKind,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == RemoteErrorKind::Conflict
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestApiSummary {
    pub id: String,
    pub name: String,
}

/// One page of a paginated listing. `next_position` is `None` on the last page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_position: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_position: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StageState {
    pub deployment_id: Option<String>,
}

pub trait ApiGateway {
    fn get_rest_apis(&self, position: Option<&str>) -> Result<Page<RestApiSummary>, RemoteError>;

    fn get_resources(
        &self,
        api_id: &str,
        position: Option<&str>,
    ) -> Result<Page<ResourceNode>, RemoteError>;

    fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<ResourceNode, RemoteError>;

    /// `Ok(None)` when the resource has no method for `verb`.
    fn get_method(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: HttpVerb,
    ) -> Result<Option<MethodState>, RemoteError>;

    fn put_method(&self, api_id: &str, resource_id: &str, verb: HttpVerb)
        -> Result<(), RemoteError>;

    fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: HttpVerb,
        uri: &str,
    ) -> Result<(), RemoteError>;

    /// Returns the id of the new deployment.
    fn create_deployment(
        &self,
        api_id: &str,
        stage: &str,
        description: &str,
    ) -> Result<String, RemoteError>;

    /// `Ok(None)` when the stage does not exist.
    fn get_stage(&self, api_id: &str, stage: &str) -> Result<Option<StageState>, RemoteError>;
}

pub trait FunctionDirectory {
    fn resolve_function(&self, name: &str) -> Result<FunctionTarget, RemoteError>;

    fn add_invoke_permission(&self, grant: &InvokeGrant) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_throttling_and_transient_errors_are_retryable() {
        let retryable: Vec<RemoteErrorKind> = [
            RemoteErrorKind::Conflict,
            RemoteErrorKind::NotFound,
            RemoteErrorKind::Throttled,
            RemoteErrorKind::Transient,
            RemoteErrorKind::Validation,
            RemoteErrorKind::AccessDenied,
            RemoteErrorKind::Other,
        ]
        .into_iter()
        .filter(|kind| kind.is_retryable())
        .collect();

        assert_eq!(
            retryable,
            vec![RemoteErrorKind::Throttled, RemoteErrorKind::Transient]
        );
    }

    #[test]
    fn error_message_names_operation_and_kind() {
        let error = RemoteError::new(RemoteErrorKind::Throttled, "create_resource", "slow down");
        assert_eq!(error.to_string(), "create_resource failed (throttled): slow down");
    }
}
