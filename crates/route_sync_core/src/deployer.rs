use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::remote::{ApiGateway, RemoteError, RemoteErrorKind};
use crate::retry::RetryPolicy;

pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeployResult {
    /// Nothing changed, so no deployment was created.
    Skipped,
    Deployed {
        deployment_id: String,
        confirmed_after_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(
        "DeployTimeout: stage `{stage}` did not switch to deployment `{deployment_id}` within {}s",
        .waited.as_secs()
    )]
    Timeout {
        stage: String,
        deployment_id: String,
        waited: Duration,
    },
}

pub struct Deployer<'a, G: ?Sized> {
    gateway: &'a G,
    retry: &'a RetryPolicy,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a, G> Deployer<'a, G>
where
    G: ApiGateway + ?Sized,
{
    pub fn new(
        gateway: &'a G,
        retry: &'a RetryPolicy,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            retry,
            timeout,
            poll_interval,
        }
    }

    /// Creates a stage deployment when `changed` is set and waits until the
    /// stage points at it.
    ///
    /// Deployments are the one mutation that is not idempotent, so a run that
    /// created nothing never deploys.
    pub fn deploy_if_changed(
        &self,
        api_id: &str,
        stage: &str,
        changed: bool,
        description: &str,
    ) -> Result<DeployResult, DeployError> {
        if !changed {
            tracing::info!(
                component = "deployer",
                event = "deployment_skipped",
                api_id,
                stage,
            );
            return Ok(DeployResult::Skipped);
        }

        // Only throttling is retried: a throttled request was never applied,
        // while a retry after a lost response would create a second snapshot.
        let deployment_id = self.retry.run_when(
            "create_deployment",
            |error| error.kind == RemoteErrorKind::Throttled,
            || self.gateway.create_deployment(api_id, stage, description),
        )?;
        tracing::info!(
            component = "deployer",
            event = "deployment_created",
            api_id,
            stage,
            deployment_id = %deployment_id,
        );

        let started_at = Instant::now();
        loop {
            let current = self
                .retry
                .run("get_stage", || self.gateway.get_stage(api_id, stage))?
                .and_then(|state| state.deployment_id);
            if current.as_deref() == Some(deployment_id.as_str()) {
                let confirmed_after_ms = started_at.elapsed().as_millis() as u64;
                tracing::info!(
                    component = "deployer",
                    event = "deployment_confirmed",
                    stage,
                    deployment_id = %deployment_id,
                    confirmed_after_ms,
                );
                return Ok(DeployResult::Deployed {
                    deployment_id,
                    confirmed_after_ms,
                });
            }

            let waited = started_at.elapsed();
            if waited >= self.timeout {
                return Err(DeployError::Timeout {
                    stage: stage.to_string(),
                    deployment_id,
                    waited,
                });
            }
            thread::sleep(self.poll_interval.min(self.timeout - waited));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_stage_and_deployment() {
        let error = DeployError::Timeout {
            stage: "prod".to_string(),
            deployment_id: "dep-1".to_string(),
            waited: Duration::from_secs(30),
        };

        assert_eq!(
            error.to_string(),
            "DeployTimeout: stage `prod` did not switch to deployment `dep-1` within 30s"
        );
    }
}
