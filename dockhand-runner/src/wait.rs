//! Waiting for containers to stop
//!
//! - `Waiter` blocks until a container exits and turns its exit code into a
//!   result, retrying transient engine failures with exponential backoff
//! - `KillWaiter` additionally kills the container until it is confirmed gone

use async_trait::async_trait;
use dockhand_client::ContainerEngine;
use dockhand_client::types::ContainerWaitResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ExecutorError, Result};

/// Retry configuration for transient wait failures
const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY_MS: u64 = 250;
const MAX_DELAY_MS: u64 = 1000;

/// How long a kill gets before it is sent again
const KILL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_KILL_ATTEMPTS: u32 = 30;

#[async_trait]
pub trait Waiter: Send + Sync {
    /// Waits for the container to stop
    ///
    /// # Returns
    /// `Ok` for exit code 0, `ExecutorError::Build` for any other code
    async fn wait(&self, cancel: &CancellationToken, id: &str) -> Result<()>;
}

#[async_trait]
pub trait KillWaiter: Waiter {
    /// Kills the container and waits for it to stop
    ///
    /// A container that no longer exists counts as stopped. A container
    /// that already exited reports its own exit code.
    async fn kill_wait(&self, cancel: &CancellationToken, id: &str) -> Result<()>;
}

/// Waiter backed by the engine's wait endpoint
pub struct DefaultWaiter {
    engine: Arc<dyn ContainerEngine>,
}

impl DefaultWaiter {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }
}

fn wait_result(response: ContainerWaitResponse) -> Result<()> {
    if let Some(error) = response.error.filter(|e| !e.message.is_empty()) {
        return Err(ExecutorError::SystemFailure(format!(
            "waiting for container: {}",
            error.message
        )));
    }

    if response.status_code != 0 {
        return Err(ExecutorError::Build {
            exit_code: response.status_code,
        });
    }

    Ok(())
}

#[async_trait]
impl Waiter for DefaultWaiter {
    async fn wait(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        let mut retries = 0;
        let mut delay = Duration::from_millis(INITIAL_DELAY_MS);

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                result = self.engine.container_wait(id) => result,
            };

            let err = match result {
                Ok(response) => return wait_result(response),
                Err(e) if e.is_not_found() => return Err(e.into()),
                Err(e) => e,
            };

            retries += 1;
            if retries > MAX_RETRIES {
                return Err(err.into());
            }

            warn!(
                "Waiting for container {} failed (attempt {}/{}): {}. Retrying in {:?}",
                id, retries, MAX_RETRIES, err, delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
        }
    }
}

#[async_trait]
impl KillWaiter for DefaultWaiter {
    async fn kill_wait(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        for attempt in 1..=MAX_KILL_ATTEMPTS {
            match self.engine.container_kill(id, "SIGKILL").await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => debug!("Killing container {} (attempt {}): {}", id, attempt, e),
                Ok(()) => {}
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                result = self.wait(cancel, id) => Some(result),
                _ = tokio::time::sleep(KILL_INTERVAL) => None,
            };

            match outcome {
                Some(Err(e)) if e.is_not_found() => return Ok(()),
                Some(result) => return result,
                None => continue,
            }
        }

        Err(ExecutorError::SystemFailure(format!(
            "container {} did not stop after {} kill attempts",
            id, MAX_KILL_ATTEMPTS
        )))
    }
}
