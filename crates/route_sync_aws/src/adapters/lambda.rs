use aws_sdk_lambda::Client;
use route_sync_core::binding::{FunctionTarget, InvokeGrant};
use route_sync_core::remote::{FunctionDirectory, RemoteError, RemoteErrorKind};

use super::errors::{classify, refine_conflict};
use super::AwsContext;

pub struct AwsFunctionDirectory {
    context: AwsContext,
    client: Client,
}

impl AwsFunctionDirectory {
    pub fn new(context: &AwsContext) -> Self {
        Self {
            client: Client::new(context.sdk_config()),
            context: context.clone(),
        }
    }
}

/// Lambda reports both "statement already exists" and "policy update in
/// progress" as `ResourceConflictException`. Only the first means the grant
/// is present; the second is worth retrying.
fn refine_permission_conflict(error: RemoteError) -> RemoteError {
    refine_conflict(error, &["already exists"])
}

impl FunctionDirectory for AwsFunctionDirectory {
    fn resolve_function(&self, name: &str) -> Result<FunctionTarget, RemoteError> {
        let output = self
            .context
            .block_on(self.client.get_function().function_name(name).send())
            .map_err(|error| classify("get_function", error))?;

        let arn = output
            .configuration()
            .and_then(|configuration| configuration.function_arn())
            .ok_or_else(|| {
                RemoteError::new(
                    RemoteErrorKind::Other,
                    "get_function",
                    format!("no ARN returned for function `{name}`"),
                )
            })?;
        FunctionTarget::from_arn(arn).map_err(|error| {
            RemoteError::new(RemoteErrorKind::Other, "get_function", error.to_string())
        })
    }

    fn add_invoke_permission(&self, grant: &InvokeGrant) -> Result<(), RemoteError> {
        self.context
            .block_on(
                self.client
                    .add_permission()
                    .function_name(&grant.function_arn)
                    .statement_id(&grant.statement_id)
                    .action(grant.action)
                    .principal(grant.principal)
                    .source_arn(&grant.source_arn)
                    .send(),
            )
            .map(|_| ())
            .map_err(|error| refine_permission_conflict(classify("add_permission", error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_statement_stays_a_conflict() {
        let error = refine_permission_conflict(RemoteError::new(
            RemoteErrorKind::Conflict,
            "add_permission",
            "The statement id (apigw-abc-0123) provided already exists. Please provide a new statement id, or remove the existing statement.",
        ));
        assert!(error.is_conflict());
    }

    #[test]
    fn policy_update_in_progress_is_retried() {
        let error = refine_permission_conflict(RemoteError::new(
            RemoteErrorKind::Conflict,
            "add_permission",
            "The operation cannot be performed at this time. An update is in progress for resource",
        ));
        assert_eq!(error.kind, RemoteErrorKind::Transient);
        assert!(error.is_retryable());
    }
}
