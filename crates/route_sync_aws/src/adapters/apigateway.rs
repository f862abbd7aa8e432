use std::error::Error as StdError;
use std::fmt::Debug;

use aws_sdk_apigateway::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_apigateway::types::IntegrationType;
use aws_sdk_apigateway::Client;
use route_sync_core::binding::{HttpVerb, MethodState, PROXY_INTEGRATION_HTTP_METHOD};
use route_sync_core::remote::{
    ApiGateway, Page, RemoteError, RemoteErrorKind, RestApiSummary, StageState,
};
use route_sync_core::tree::ResourceNode;

use super::errors::{classify, refine_conflict};
use super::AwsContext;

/// Largest page API Gateway returns for list calls.
const PAGE_LIMIT: i32 = 500;
const AUTHORIZATION_NONE: &str = "NONE";

pub struct AwsApiGateway {
    context: AwsContext,
    client: Client,
}

impl AwsApiGateway {
    pub fn new(context: &AwsContext) -> Self {
        Self {
            client: Client::new(context.sdk_config()),
            context: context.clone(),
        }
    }
}

/// Messages API Gateway uses when the resource or method being created is
/// already there. Every other `ConflictException` is a concurrent
/// modification of the API that was not applied.
const EXISTS_MARKERS: [&str; 2] = ["already exists", "already has this name"];

fn classify_mutation<E, R>(operation: &str, error: SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    refine_conflict(classify(operation, error), &EXISTS_MARKERS)
}

fn missing_field(operation: &str, field: &str) -> RemoteError {
    RemoteError::new(
        RemoteErrorKind::Other,
        operation,
        format!("response is missing `{field}`"),
    )
}

fn resource_node(
    operation: &str,
    id: Option<&str>,
    parent_id: Option<&str>,
    path_part: Option<&str>,
    path: Option<&str>,
) -> Result<ResourceNode, RemoteError> {
    let id = id.ok_or_else(|| missing_field(operation, "id"))?;
    let path = path.ok_or_else(|| missing_field(operation, "path"))?;
    Ok(ResourceNode {
        id: id.to_string(),
        parent_id: parent_id.map(str::to_string),
        path_part: path_part.unwrap_or_default().to_string(),
        path: path.to_string(),
    })
}

impl ApiGateway for AwsApiGateway {
    fn get_rest_apis(&self, position: Option<&str>) -> Result<Page<RestApiSummary>, RemoteError> {
        let output = self
            .context
            .block_on(
                self.client
                    .get_rest_apis()
                    .set_position(position.map(str::to_string))
                    .limit(PAGE_LIMIT)
                    .send(),
            )
            .map_err(|error| classify("get_rest_apis", error))?;

        let items = output
            .items()
            .iter()
            .filter_map(|api| {
                Some(RestApiSummary {
                    id: api.id()?.to_string(),
                    name: api.name().unwrap_or_default().to_string(),
                })
            })
            .collect();
        Ok(Page {
            items,
            next_position: output.position().map(str::to_string),
        })
    }

    fn get_resources(
        &self,
        api_id: &str,
        position: Option<&str>,
    ) -> Result<Page<ResourceNode>, RemoteError> {
        let output = self
            .context
            .block_on(
                self.client
                    .get_resources()
                    .rest_api_id(api_id)
                    .set_position(position.map(str::to_string))
                    .limit(PAGE_LIMIT)
                    .send(),
            )
            .map_err(|error| classify("get_resources", error))?;

        let items = output
            .items()
            .iter()
            .map(|resource| {
                resource_node(
                    "get_resources",
                    resource.id(),
                    resource.parent_id(),
                    resource.path_part(),
                    resource.path(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            next_position: output.position().map(str::to_string),
        })
    }

    fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<ResourceNode, RemoteError> {
        let output = self
            .context
            .block_on(
                self.client
                    .create_resource()
                    .rest_api_id(api_id)
                    .parent_id(parent_id)
                    .path_part(path_part)
                    .send(),
            )
            .map_err(|error| classify_mutation("create_resource", error))?;

        resource_node(
            "create_resource",
            output.id(),
            output.parent_id().or(Some(parent_id)),
            output.path_part().or(Some(path_part)),
            output.path(),
        )
    }

    fn get_method(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: HttpVerb,
    ) -> Result<Option<MethodState>, RemoteError> {
        let result = self.context.block_on(
            self.client
                .get_method()
                .rest_api_id(api_id)
                .resource_id(resource_id)
                .http_method(verb.as_str())
                .send(),
        );
        match result {
            Ok(output) => Ok(Some(MethodState {
                integration_uri: output
                    .method_integration()
                    .and_then(|integration| integration.uri())
                    .map(str::to_string),
            })),
            Err(error) => {
                let error = classify("get_method", error);
                if error.kind == RemoteErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(error)
                }
            }
        }
    }

    fn put_method(&self, api_id: &str, resource_id: &str, verb: HttpVerb) -> Result<(), RemoteError> {
        self.context
            .block_on(
                self.client
                    .put_method()
                    .rest_api_id(api_id)
                    .resource_id(resource_id)
                    .http_method(verb.as_str())
                    .authorization_type(AUTHORIZATION_NONE)
                    .send(),
            )
            .map(|_| ())
            .map_err(|error| classify_mutation("put_method", error))
    }

    fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: HttpVerb,
        uri: &str,
    ) -> Result<(), RemoteError> {
        self.context
            .block_on(
                self.client
                    .put_integration()
                    .rest_api_id(api_id)
                    .resource_id(resource_id)
                    .http_method(verb.as_str())
                    .r#type(IntegrationType::AwsProxy)
                    .integration_http_method(PROXY_INTEGRATION_HTTP_METHOD)
                    .uri(uri)
                    .send(),
            )
            .map(|_| ())
            .map_err(|error| classify_mutation("put_integration", error))
    }

    fn create_deployment(
        &self,
        api_id: &str,
        stage: &str,
        description: &str,
    ) -> Result<String, RemoteError> {
        let output = self
            .context
            .block_on(
                self.client
                    .create_deployment()
                    .rest_api_id(api_id)
                    .stage_name(stage)
                    .description(description)
                    .send(),
            )
            .map_err(|error| classify_mutation("create_deployment", error))?;
        output
            .id()
            .map(str::to_string)
            .ok_or_else(|| missing_field("create_deployment", "id"))
    }

    fn get_stage(&self, api_id: &str, stage: &str) -> Result<Option<StageState>, RemoteError> {
        let result = self.context.block_on(
            self.client
                .get_stage()
                .rest_api_id(api_id)
                .stage_name(stage)
                .send(),
        );
        match result {
            Ok(output) => Ok(Some(StageState {
                deployment_id: output.deployment_id().map(str::to_string),
            })),
            Err(error) => {
                let error = classify("get_stage", error);
                if error.kind == RemoteErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(error)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_resource_has_empty_path_part() {
        let node = resource_node("get_resources", Some("r0"), None, None, Some("/"))
            .expect("root should convert");
        assert!(node.is_root());
        assert_eq!(node.path_part, "");
    }

    #[test]
    fn only_existing_targets_stay_conflicts() {
        let sibling = refine_conflict(
            RemoteError::new(
                RemoteErrorKind::Conflict,
                "create_resource",
                "Another resource with the same parent already has this name: users",
            ),
            &EXISTS_MARKERS,
        );
        assert!(sibling.is_conflict());

        let concurrent = refine_conflict(
            RemoteError::new(
                RemoteErrorKind::Conflict,
                "put_integration",
                "Unable to complete operation due to concurrent modification. Please try again later.",
            ),
            &EXISTS_MARKERS,
        );
        assert_eq!(concurrent.kind, RemoteErrorKind::Transient);
        assert!(concurrent.is_retryable());
    }

    #[test]
    fn resource_without_id_is_rejected() {
        let error = resource_node("create_resource", None, Some("r0"), Some("users"), Some("/users"))
            .expect_err("missing id should fail");
        assert_eq!(error.kind, RemoteErrorKind::Other);
        assert!(error.message.contains("`id`"));
    }
}
