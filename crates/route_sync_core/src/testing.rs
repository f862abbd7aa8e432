//! In-memory stand-ins for the hosting system, used by tests.
//!
//! [`InMemoryApiGateway`] behaves like API Gateway for the calls the
//! reconciler makes: sibling path parts are unique, re-creating a resource
//! or method is a conflict, and listings are paginated. Failures, competing
//! writers and slow stage updates can be injected.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::binding::{FunctionTarget, HttpVerb, InvokeGrant, MethodState};
use crate::remote::{
    ApiGateway, FunctionDirectory, Page, RemoteError, RemoteErrorKind, RestApiSummary, StageState,
};
use crate::tree::ResourceNode;

#[derive(Debug, Default)]
struct ApiState {
    resources: Vec<ResourceNode>,
    methods: BTreeMap<(String, HttpVerb), MethodState>,
    stages: HashMap<String, String>,
    deployments: Vec<String>,
}

#[derive(Debug, Default)]
struct GatewayState {
    apis: Vec<RestApiSummary>,
    by_api: HashMap<String, ApiState>,
    next_id: usize,
    injected: HashMap<String, VecDeque<RemoteErrorKind>>,
    /// (api id, parent path, path part) created by a competing writer just
    /// before our own create reaches the API.
    competing_creates: Vec<(String, String, String)>,
    calls: Vec<String>,
    stage_lag_polls: usize,
    stage_polls_seen: usize,
    stage_never_updates: bool,
}

impl GatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }

    fn take_injected(&mut self, operation: &str) -> Option<RemoteError> {
        let kind = self.injected.get_mut(operation)?.pop_front()?;
        Some(RemoteError::new(kind, operation, "injected failure"))
    }

    fn api_mut(&mut self, api_id: &str, operation: &str) -> Result<&mut ApiState, RemoteError> {
        self.by_api.get_mut(api_id).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::NotFound,
                operation,
                format!("Invalid API identifier specified: {api_id}"),
            )
        })
    }
}

#[derive(Debug)]
pub struct InMemoryApiGateway {
    state: Mutex<GatewayState>,
    page_size: usize,
    reject_sibling_parameters: bool,
}

impl Default for InMemoryApiGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryApiGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GatewayState::default()),
            page_size: 25,
            reject_sibling_parameters: false,
        }
    }

    /// Page size for `get_resources` and `get_rest_apis`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Rejects a parameter path part when a sibling parameter with another
    /// name exists, as API Gateway itself does.
    pub fn rejecting_sibling_parameters(mut self) -> Self {
        self.reject_sibling_parameters = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().expect("poisoned mutex")
    }

    /// Registers a REST API with only its root resource and returns its id.
    pub fn add_api(&self, name: &str) -> String {
        let mut state = self.lock();
        let api_id = state.next_id("api");
        let root_id = state.next_id("res");
        state.apis.push(RestApiSummary {
            id: api_id.clone(),
            name: name.to_string(),
        });
        state.by_api.insert(
            api_id.clone(),
            ApiState {
                resources: vec![ResourceNode::root(root_id)],
                ..ApiState::default()
            },
        );
        api_id
    }

    /// Creates `path` (and missing ancestors) directly, as another module's
    /// earlier run would have.
    pub fn seed_path(&self, api_id: &str, path: &str) -> String {
        let mut state = self.lock();
        let mut parent = root_of(&state, api_id);
        for part in path.split('/').filter(|part| !part.is_empty()) {
            parent = match find_child(&state, api_id, &parent.id, part) {
                Some(node) => node,
                None => insert_child(&mut state, api_id, &parent, part),
            };
        }
        parent.id
    }

    /// Binds `verb` on `path` directly, optionally with an integration.
    pub fn seed_method(&self, api_id: &str, path: &str, verb: HttpVerb, uri: Option<&str>) {
        let resource_id = self.seed_path(api_id, path);
        let mut state = self.lock();
        let api = state.by_api.get_mut(api_id).expect("api should exist");
        api.methods.insert(
            (resource_id, verb),
            MethodState {
                integration_uri: uri.map(str::to_string),
            },
        );
    }

    /// Fails the next `times` calls to `operation` with `kind`.
    pub fn fail_next(&self, operation: &str, kind: RemoteErrorKind, times: usize) {
        let mut state = self.lock();
        let queue = state.injected.entry(operation.to_string()).or_default();
        queue.extend(std::iter::repeat(kind).take(times));
    }

    /// Simulates another run creating `parent_path/path_part` between our
    /// listing and our create call.
    pub fn race_create(&self, api_id: &str, parent_path: &str, path_part: &str) {
        self.lock().competing_creates.push((
            api_id.to_string(),
            parent_path.to_string(),
            path_part.to_string(),
        ));
    }

    /// The stage keeps reporting its previous deployment for `polls` reads.
    pub fn delay_stage_updates(&self, polls: usize) {
        self.lock().stage_lag_polls = polls;
    }

    pub fn freeze_stage(&self) {
        self.lock().stage_never_updates = true;
    }

    /// Names of mutating calls that reached the API, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    pub fn resources(&self, api_id: &str) -> Vec<ResourceNode> {
        self.lock()
            .by_api
            .get(api_id)
            .map(|api| api.resources.clone())
            .unwrap_or_default()
    }

    /// Every resource path in the API, sorted.
    pub fn paths(&self, api_id: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .resources(api_id)
            .into_iter()
            .map(|node| node.path)
            .collect();
        paths.sort();
        paths
    }

    pub fn method(&self, api_id: &str, path: &str, verb: HttpVerb) -> Option<MethodState> {
        let state = self.lock();
        let api = state.by_api.get(api_id)?;
        let node = api.resources.iter().find(|node| node.path == path)?;
        api.methods.get(&(node.id.clone(), verb)).cloned()
    }

    pub fn deployments(&self, api_id: &str) -> Vec<String> {
        self.lock()
            .by_api
            .get(api_id)
            .map(|api| api.deployments.clone())
            .unwrap_or_default()
    }
}

fn root_of(state: &GatewayState, api_id: &str) -> ResourceNode {
    state.by_api[api_id]
        .resources
        .iter()
        .find(|node| node.is_root())
        .cloned()
        .expect("api should have a root")
}

fn find_child(
    state: &GatewayState,
    api_id: &str,
    parent_id: &str,
    path_part: &str,
) -> Option<ResourceNode> {
    state.by_api.get(api_id)?.resources.iter().find(|node| {
        node.parent_id.as_deref() == Some(parent_id) && node.path_part == path_part
    })
    .cloned()
}

fn insert_child(
    state: &mut GatewayState,
    api_id: &str,
    parent: &ResourceNode,
    path_part: &str,
) -> ResourceNode {
    let id = state.next_id("res");
    let node = ResourceNode::child_of(parent, id, path_part);
    if let Some(api) = state.by_api.get_mut(api_id) {
        api.resources.push(node.clone());
    }
    node
}

fn paginate<T: Clone>(
    items: &[T],
    position: Option<&str>,
    page_size: usize,
    operation: &str,
) -> Result<Page<T>, RemoteError> {
    let start = match position {
        None => 0,
        Some(token) => token.parse::<usize>().map_err(|_| {
            RemoteError::new(
                RemoteErrorKind::Validation,
                operation,
                format!("invalid position `{token}`"),
            )
        })?,
    };
    let end = (start + page_size).min(items.len());
    let page_items = items.get(start..end).unwrap_or_default().to_vec();
    Ok(Page {
        items: page_items,
        next_position: (end < items.len()).then(|| end.to_string()),
    })
}

impl ApiGateway for InMemoryApiGateway {
    fn get_rest_apis(&self, position: Option<&str>) -> Result<Page<RestApiSummary>, RemoteError> {
        let mut state = self.lock();
        if let Some(error) = state.take_injected("get_rest_apis") {
            return Err(error);
        }
        paginate(&state.apis, position, self.page_size, "get_rest_apis")
    }

    fn get_resources(
        &self,
        api_id: &str,
        position: Option<&str>,
    ) -> Result<Page<ResourceNode>, RemoteError> {
        let mut state = self.lock();
        if let Some(error) = state.take_injected("get_resources") {
            return Err(error);
        }
        let api = state.api_mut(api_id, "get_resources")?;
        paginate(&api.resources, position, self.page_size, "get_resources")
    }

    fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<ResourceNode, RemoteError> {
        let mut state = self.lock();
        if let Some(error) = state.take_injected("create_resource") {
            return Err(error);
        }
        let parent = state
            .api_mut(api_id, "create_resource")?
            .resources
            .iter()
            .find(|node| node.id == parent_id)
            .cloned()
            .ok_or_else(|| {
                RemoteError::new(
                    RemoteErrorKind::NotFound,
                    "create_resource",
                    format!("Invalid Resource identifier specified: {parent_id}"),
                )
            })?;

        let competing = state.competing_creates.iter().position(|(api, parent_path, part)| {
            api == api_id && parent_path == &parent.path && part == path_part
        });
        if let Some(position) = competing {
            state.competing_creates.remove(position);
            if find_child(&state, api_id, parent_id, path_part).is_none() {
                insert_child(&mut state, api_id, &parent, path_part);
            }
        }

        if find_child(&state, api_id, parent_id, path_part).is_some() {
            return Err(RemoteError::new(
                RemoteErrorKind::Conflict,
                "create_resource",
                format!("Another resource with the same parent already has this name: {path_part}"),
            ));
        }

        if self.reject_sibling_parameters && path_part.starts_with('{') {
            let clash = state.by_api[api_id].resources.iter().find(|node| {
                node.parent_id.as_deref() == Some(parent_id) && node.path_part.starts_with('{')
            });
            if let Some(sibling) = clash {
                return Err(RemoteError::new(
                    RemoteErrorKind::Conflict,
                    "create_resource",
                    format!(
                        "A sibling ({}) of this resource already has a variable path part",
                        sibling.path_part
                    ),
                ));
            }
        }

        state.calls.push("create_resource".to_string());
        Ok(insert_child(&mut state, api_id, &parent, path_part))
    }

    fn get_method(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: HttpVerb,
    ) -> Result<Option<MethodState>, RemoteError> {
        let mut state = self.lock();
        if let Some(error) = state.take_injected("get_method") {
            return Err(error);
        }
        let api = state.api_mut(api_id, "get_method")?;
        Ok(api.methods.get(&(resource_id.to_string(), verb)).cloned())
    }

    fn put_method(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: HttpVerb,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if let Some(error) = state.take_injected("put_method") {
            return Err(error);
        }
        let api = state.api_mut(api_id, "put_method")?;
        let key = (resource_id.to_string(), verb);
        if api.methods.contains_key(&key) {
            return Err(RemoteError::new(
                RemoteErrorKind::Conflict,
                "put_method",
                "Method already exists for this resource",
            ));
        }
        api.methods.insert(key, MethodState::default());
        state.calls.push("put_method".to_string());
        Ok(())
    }

    fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: HttpVerb,
        uri: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if let Some(error) = state.take_injected("put_integration") {
            return Err(error);
        }
        let api = state.api_mut(api_id, "put_integration")?;
        let Some(method) = api.methods.get_mut(&(resource_id.to_string(), verb)) else {
            return Err(RemoteError::new(
                RemoteErrorKind::NotFound,
                "put_integration",
                "Invalid Method identifier specified",
            ));
        };
        method.integration_uri = Some(uri.to_string());
        state.calls.push("put_integration".to_string());
        Ok(())
    }

    fn create_deployment(
        &self,
        api_id: &str,
        stage: &str,
        _description: &str,
    ) -> Result<String, RemoteError> {
        let mut state = self.lock();
        if let Some(error) = state.take_injected("create_deployment") {
            return Err(error);
        }
        let deployment_id = state.next_id("dep");
        let lagging = state.stage_never_updates || state.stage_lag_polls > 0;
        state.stage_polls_seen = 0;
        let api = state.api_mut(api_id, "create_deployment")?;
        api.deployments.push(deployment_id.clone());
        if !lagging {
            api.stages.insert(stage.to_string(), deployment_id.clone());
        }
        state.calls.push("create_deployment".to_string());
        Ok(deployment_id)
    }

    fn get_stage(&self, api_id: &str, stage: &str) -> Result<Option<StageState>, RemoteError> {
        let mut state = self.lock();
        if let Some(error) = state.take_injected("get_stage") {
            return Err(error);
        }
        state.stage_polls_seen += 1;
        let lagging = state.stage_never_updates || state.stage_polls_seen <= state.stage_lag_polls;
        let api = state.api_mut(api_id, "get_stage")?;
        if !lagging {
            if let Some(latest) = api.deployments.last().cloned() {
                api.stages.insert(stage.to_string(), latest);
            }
        }
        Ok(api.stages.get(stage).map(|deployment_id| StageState {
            deployment_id: Some(deployment_id.clone()),
        }))
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    functions: HashMap<String, String>,
    /// Keyed by (function ARN, statement id); statement ids are per function.
    grants: BTreeMap<(String, String), InvokeGrant>,
    injected: HashMap<String, VecDeque<RemoteErrorKind>>,
}

#[derive(Debug, Default)]
pub struct InMemoryFunctionDirectory {
    state: Mutex<DirectoryState>,
}

impl InMemoryFunctionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DirectoryState> {
        self.state.lock().expect("poisoned mutex")
    }

    /// Registers `name` in `region`/`account_id` and returns its ARN.
    pub fn add_function(&self, name: &str, region: &str, account_id: &str) -> String {
        let arn = format!("arn:aws:lambda:{region}:{account_id}:function:{name}");
        self.lock().functions.insert(name.to_string(), arn.clone());
        arn
    }

    pub fn fail_next(&self, operation: &str, kind: RemoteErrorKind, times: usize) {
        let mut state = self.lock();
        let queue = state.injected.entry(operation.to_string()).or_default();
        queue.extend(std::iter::repeat(kind).take(times));
    }

    pub fn grants(&self) -> Vec<InvokeGrant> {
        self.lock().grants.values().cloned().collect()
    }
}

impl FunctionDirectory for InMemoryFunctionDirectory {
    fn resolve_function(&self, name: &str) -> Result<FunctionTarget, RemoteError> {
        let mut state = self.lock();
        if let Some(kind) = state
            .injected
            .get_mut("get_function")
            .and_then(VecDeque::pop_front)
        {
            return Err(RemoteError::new(kind, "get_function", "injected failure"));
        }
        let arn = state.functions.get(name).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::NotFound,
                "get_function",
                format!("Function not found: {name}"),
            )
        })?;
        FunctionTarget::from_arn(arn)
            .map_err(|error| RemoteError::new(RemoteErrorKind::Other, "get_function", error.to_string()))
    }

    fn add_invoke_permission(&self, grant: &InvokeGrant) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if let Some(kind) = state
            .injected
            .get_mut("add_permission")
            .and_then(VecDeque::pop_front)
        {
            return Err(RemoteError::new(kind, "add_permission", "injected failure"));
        }
        let key = (grant.function_arn.clone(), grant.statement_id.clone());
        if state.grants.contains_key(&key) {
            return Err(RemoteError::new(
                RemoteErrorKind::Conflict,
                "add_permission",
                format!(
                    "The statement id ({}) provided already exists",
                    grant.statement_id
                ),
            ));
        }
        state.grants.insert(key, grant.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginates_resource_listing() {
        let gateway = InMemoryApiGateway::new().with_page_size(2);
        let api_id = gateway.add_api("MainApiGateway");
        gateway.seed_path(&api_id, "/a/b/c");

        let first = gateway.get_resources(&api_id, None).expect("first page");
        assert_eq!(first.items.len(), 2);
        let second = gateway
            .get_resources(&api_id, first.next_position.as_deref())
            .expect("second page");
        assert_eq!(second.items.len(), 2);
        assert!(second.next_position.is_none());
    }

    #[test]
    fn rejects_duplicate_siblings_as_conflict() {
        let gateway = InMemoryApiGateway::new();
        let api_id = gateway.add_api("MainApiGateway");
        let root = gateway.resources(&api_id)[0].clone();

        gateway
            .create_resource(&api_id, &root.id, "users")
            .expect("first create");
        let error = gateway
            .create_resource(&api_id, &root.id, "users")
            .expect_err("second create should conflict");
        assert!(error.is_conflict());
    }

    #[test]
    fn competing_create_lands_before_ours() {
        let gateway = InMemoryApiGateway::new();
        let api_id = gateway.add_api("MainApiGateway");
        let root = gateway.resources(&api_id)[0].clone();
        gateway.race_create(&api_id, "/", "shared");

        let error = gateway
            .create_resource(&api_id, &root.id, "shared")
            .expect_err("our create should lose the race");
        assert!(error.is_conflict());
        assert_eq!(gateway.paths(&api_id), vec!["/", "/shared"]);
        assert_eq!(gateway.count_calls("create_resource"), 0);
    }
}
