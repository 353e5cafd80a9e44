//! Image pull manager
//!
//! Resolves an image name to an inspected local image under an ordered
//! list of pull policies. Each policy is tried in turn until one produces
//! an image. Images resolved once are remembered for the rest of the job
//! so they are never pulled twice.

use async_trait::async_trait;
use dockhand_client::types::ImageInspect;
use dockhand_core::auth::{AuthConfig, AuthResolver, encode_auth_header};
use dockhand_core::config::{DockerSettings, PullPolicy, parse_pull_policies};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::with_cancel;
use crate::context::JobContext;
use crate::error::{ExecutorError, FailureKind, Result};

/// Pull errors caused by the image reference itself
static USER_PULL_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new("(repository does not exist|not found|no such host)")
        .expect("pull error regex")
});

pub const SOURCE_PIPELINE: &str = "GitLab pipeline config";
pub const SOURCE_RUNNER: &str = "Runner config";
pub const SOURCE_RUNNER_DEFAULT: &str = "Runner config (default)";

/// Notified whenever an image is actually pulled from a registry
pub trait PullObserver: Send + Sync {
    fn on_pull_start(&self);
}

/// Resolves images for containers
#[async_trait]
pub trait PullManager: Send + Sync {
    /// Returns the local image for `name`, pulling it when a policy asks for it
    ///
    /// # Arguments
    /// * `cancel` - Job cancellation token
    /// * `name` - Expanded image name
    /// * `pull_policies` - Policies requested by the job, `None` for the runner's
    async fn get_image(
        &self,
        cancel: &CancellationToken,
        name: &str,
        pull_policies: Option<&[String]>,
    ) -> Result<ImageInspect>;
}

/// Formats policies like `[always if-not-present]`
pub fn format_policies(policies: &[PullPolicy]) -> String {
    let names: Vec<&str> = policies.iter().map(|p| p.as_str()).collect();
    format!("[{}]", names.join(" "))
}

/// Picks the policy list for an image and checks it against the allowed policies
///
/// Policies set on the image win over the runner's; the runner's default
/// is `[always]`.
pub fn resolve_pull_policies(
    requested: Option<&[String]>,
    settings: &DockerSettings,
) -> Result<Vec<PullPolicy>> {
    let requested = requested.filter(|p| !p.is_empty());
    let (policies, source) = match requested {
        Some(names) => (parse_pull_policies(names)?, SOURCE_PIPELINE),
        None if !settings.pull_policy.is_empty() => (settings.pull_policies()?, SOURCE_RUNNER),
        None => (settings.pull_policies()?, SOURCE_RUNNER_DEFAULT),
    };

    let allowed = settings.allowed_pull_policies()?;
    if policies.iter().any(|p| !allowed.contains(p)) {
        return Err(ExecutorError::IncompatiblePullPolicy {
            requested: format_policies(&policies),
            allowed: format_policies(&allowed),
            policy_source: source.to_string(),
        });
    }

    Ok(policies)
}

/// Pull manager talking to the job's engine
pub struct DefaultPullManager {
    context: Arc<JobContext>,
    resolver: AuthResolver,
    observer: Option<Arc<dyn PullObserver>>,

    /// Image name -> image id resolved during this job
    used_images: Mutex<HashMap<String, String>>,
}

impl DefaultPullManager {
    pub fn new(context: Arc<JobContext>) -> Self {
        Self {
            context,
            resolver: AuthResolver::new(),
            observer: None,
            used_images: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PullObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[cfg(test)]
    pub fn with_auth_resolver(mut self, resolver: AuthResolver) -> Self {
        self.resolver = resolver;
        self
    }

    fn was_used(&self, name: &str, id: &str) -> bool {
        let used = self.used_images.lock().unwrap();
        used.get(name).is_some_and(|used_id| used_id == id)
    }

    fn mark_used(&self, name: &str, image: &ImageInspect) {
        self.used_images
            .lock()
            .unwrap()
            .insert(name.to_string(), image.id.clone());

        if name == image.id {
            return;
        }

        let logger = &self.context.logger;
        match image.repo_digests.first() {
            Some(digest) => logger.println(&format!(
                "Using docker image {} for {} with digest {} ...",
                image.id, name, digest
            )),
            None => logger.println(&format!("Using docker image {} for {} ...", image.id, name)),
        }
    }

    async fn image_with_policy(
        &self,
        cancel: &CancellationToken,
        name: &str,
        policy: PullPolicy,
    ) -> Result<ImageInspect> {
        let engine = &self.context.engine;
        self.context
            .logger
            .debugln(&format!("Looking for image {} ...", name));

        let existing = match with_cancel(cancel, engine.image_inspect(name)).await {
            Ok(image) => Some(image),
            Err(e) if e.is_not_found() && policy != PullPolicy::Never => None,
            Err(e) => return Err(e),
        };

        if let Some(image) = existing {
            if self.was_used(name, &image.id) || image.id == name {
                return Ok(image);
            }
            match policy {
                PullPolicy::Never => return Ok(image),
                PullPolicy::IfNotPresent => {
                    self.context.logger.println(&format!(
                        "Using locally found image version due to {:?} pull policy",
                        policy.as_str()
                    ));
                    return Ok(image);
                }
                PullPolicy::Always => {}
            }
        }

        let auth = self.resolve_auth(name)?;
        self.pull(cancel, name, auth.as_ref()).await
    }

    fn resolve_auth(&self, name: &str) -> Result<Option<AuthConfig>> {
        let job = &self.context.job;
        let info = self.resolver.config_for_image(
            name,
            job.variables.get("DOCKER_AUTH_CONFIG"),
            &job.credentials,
        )?;

        let logger = &self.context.logger;
        match info {
            None => {
                logger.debugln(&format!("No credentials found for {}", name));
                Ok(None)
            }
            Some(info) => {
                logger.println(&format!("Authenticating with credentials from {}", info.source));
                logger.debugln(&format!(
                    "Using {} to connect to {} in order to resolve {}...",
                    info.auth.username, info.auth.server_address, name
                ));
                Ok(Some(info.auth))
            }
        }
    }

    async fn pull(
        &self,
        cancel: &CancellationToken,
        name: &str,
        auth: Option<&AuthConfig>,
    ) -> Result<ImageInspect> {
        if let Some(observer) = &self.observer {
            observer.on_pull_start();
        }
        self.context
            .logger
            .println(&format!("Pulling docker image {} ...", name));

        let reference = if name.contains([':', '@']) {
            name.to_string()
        } else {
            format!("{}:latest", name)
        };
        let header = auth.map(encode_auth_header).transpose()?;

        let engine = &self.context.engine;
        match with_cancel(cancel, engine.image_pull(&reference, header.as_deref())).await {
            Err(ExecutorError::Engine(e)) if USER_PULL_ERROR.is_match(&e.to_string()) => {
                return Err(ExecutorError::ScriptFailure(e.to_string()));
            }
            Err(e) => return Err(e),
            Ok(()) => debug!("Pulled {}", reference),
        }

        with_cancel(cancel, engine.image_inspect(name)).await
    }
}

#[async_trait]
impl PullManager for DefaultPullManager {
    async fn get_image(
        &self,
        cancel: &CancellationToken,
        name: &str,
        pull_policies: Option<&[String]>,
    ) -> Result<ImageInspect> {
        let policies = resolve_pull_policies(pull_policies, self.context.docker())?;
        let logger = &self.context.logger;

        let mut last_error = None;
        for (idx, policy) in policies.iter().enumerate() {
            if idx > 0 {
                logger.infoln(&format!(
                    "Attempt #{}: Trying {:?} pull policy",
                    idx + 1,
                    policy.as_str()
                ));
            }

            match self.image_with_policy(cancel, name, *policy).await {
                Ok(image) => {
                    self.mark_used(name, &image);
                    return Ok(image);
                }
                Err(ExecutorError::Cancelled) => return Err(ExecutorError::Cancelled),
                Err(e) => {
                    logger.warningln(&format!(
                        "Failed to pull image with policy {:?}: {}",
                        policy.as_str(),
                        e
                    ));
                    last_error = Some(e);
                }
            }
        }

        let Some(err) = last_error else {
            return Err(ExecutorError::SystemFailure(format!(
                "no pull policies for image {:?}",
                name
            )));
        };
        let message = format!(
            "failed to pull image {:?} with specified policies {}: {}",
            name,
            format_policies(&policies),
            err
        );
        Err(match err.failure_kind() {
            FailureKind::SystemFailure => ExecutorError::SystemFailure(message),
            _ => ExecutorError::ScriptFailure(message),
        })
    }
}
