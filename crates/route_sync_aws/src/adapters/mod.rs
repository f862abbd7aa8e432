pub mod apigateway;
pub mod errors;
pub mod lambda;

use std::future::Future;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use thiserror::Error;

pub use apigateway::AwsApiGateway;
pub use lambda::AwsFunctionDirectory;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Shared SDK configuration plus the runtime the synchronous seams block on.
///
/// The reconciler is synchronous, so every adapter call enters this runtime
/// with `block_on`. Adapters must not be called from inside another runtime.
#[derive(Clone)]
pub struct AwsContext {
    runtime: Arc<tokio::runtime::Runtime>,
    sdk_config: SdkConfig,
}

impl AwsContext {
    /// Loads credentials and region from the default provider chain,
    /// overriding the region when one is given.
    pub fn load(region: Option<String>) -> Result<Self, AdapterError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let sdk_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            loader.load().await
        });
        tracing::debug!(
            component = "aws_context",
            event = "sdk_config_loaded",
            region = ?sdk_config.region().map(ToString::to_string),
        );
        Ok(Self {
            runtime: Arc::new(runtime),
            sdk_config,
        })
    }

    /// Context with no credentials or region, for runs that never call AWS.
    pub fn offline() -> Result<Self, AdapterError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
            sdk_config: SdkConfig::builder()
                .behavior_version(BehaviorVersion::latest())
                .build(),
        })
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk_config
    }

    pub(crate) fn block_on<T>(&self, future: impl Future<Output = T>) -> T {
        self.runtime.block_on(future)
    }
}
