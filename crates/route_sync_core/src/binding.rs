//! Method bindings, proxy integrations and invoke grants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::path::PathSpec;

pub const APIGATEWAY_PRINCIPAL: &str = "apigateway.amazonaws.com";
pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";
pub const PROXY_INTEGRATION_HTTP_METHOD: &str = "POST";
pub const LAMBDA_INVOKE_API_VERSION: &str = "2015-03-31";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

impl HttpVerb {
    pub const ALL: [HttpVerb; 6] = [
        HttpVerb::Get,
        HttpVerb::Post,
        HttpVerb::Put,
        HttpVerb::Delete,
        HttpVerb::Patch,
        HttpVerb::Options,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported HTTP method `{0}`; expected one of GET, POST, PUT, DELETE, PATCH, OPTIONS")]
pub struct UnknownVerb(pub String);

impl FromStr for HttpVerb {
    type Err = UnknownVerb;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        HttpVerb::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownVerb(value.to_string()))
    }
}

impl TryFrom<String> for HttpVerb {
    type Error = UnknownVerb;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpVerb> for String {
    fn from(verb: HttpVerb) -> Self {
        verb.as_str().to_string()
    }
}

/// Deployed compute target that receives proxied requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionTarget {
    pub name: String,
    pub arn: String,
    pub partition: String,
    pub region: String,
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{arn}` is not a Lambda function ARN: {reason}")]
pub struct ArnError {
    pub arn: String,
    pub reason: &'static str,
}

impl FunctionTarget {
    /// Parses `arn:{partition}:lambda:{region}:{account}:function:{name}[:{qualifier}]`.
    pub fn from_arn(arn: &str) -> Result<Self, ArnError> {
        let invalid = |reason| ArnError {
            arn: arn.to_string(),
            reason,
        };

        let parts: Vec<&str> = arn.split(':').collect();
        if parts.len() < 7 || parts[0] != "arn" {
            return Err(invalid("expected at least seven `:`-separated fields"));
        }
        if parts[2] != "lambda" || parts[5] != "function" {
            return Err(invalid("service must be `lambda` with resource type `function`"));
        }
        let (partition, region, account_id, name) = (parts[1], parts[3], parts[4], parts[6]);
        if partition.is_empty() {
            return Err(invalid("partition must be non-empty"));
        }
        if region.is_empty() || account_id.is_empty() || name.is_empty() {
            return Err(invalid("region, account and function name must be non-empty"));
        }

        Ok(Self {
            name: name.to_string(),
            arn: arn.to_string(),
            partition: partition.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
        })
    }

    /// `AWS_PROXY` integration URI pointing at this function.
    pub fn integration_uri(&self) -> String {
        format!(
            "arn:{}:apigateway:{}:lambda:path/{}/functions/{}/invocations",
            self.partition,
            self.region, LAMBDA_INVOKE_API_VERSION, self.arn
        )
    }
}

/// Observed state of one method on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodState {
    pub integration_uri: Option<String>,
}

/// Resource-policy statement allowing the API to invoke the function for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeGrant {
    pub function_arn: String,
    pub statement_id: String,
    pub source_arn: String,
    pub principal: &'static str,
    pub action: &'static str,
}

impl InvokeGrant {
    pub fn for_route(target: &FunctionTarget, api_id: &str, path: &PathSpec) -> Self {
        Self {
            function_arn: target.arn.clone(),
            statement_id: grant_statement_id(api_id, path),
            source_arn: format!(
                "arn:{}:execute-api:{}:{}:{}/*/*/{}",
                target.partition,
                target.region,
                target.account_id,
                api_id,
                path.wildcard_path()
            ),
            principal: APIGATEWAY_PRINCIPAL,
            action: INVOKE_ACTION,
        }
    }
}

/// Deterministic statement id, so repeated grants for the same route collide
/// instead of piling up in the function policy.
pub fn grant_statement_id(api_id: &str, path: &PathSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string());
    let digest = format!("{:x}", hasher.finalize());
    format!("apigw-{api_id}-{}", &digest[..16])
}
