//! Image name expansion and allowlist checks

use dockhand_core::allowlist::{self, AllowlistError};

use crate::context::JobContext;
use crate::error::{ExecutorError, Result};
use crate::trace::BuildLogger;

const ALLOWED_IMAGES_HELP: &str = "Please check runner's configuration: http://doc.gitlab.com/ci/docker/using_docker_images.html#overwrite-image-and-services";

/// Checks an image against an allowlist, explaining a rejection in the trace
///
/// # Arguments
/// * `option` - Name of the setting, `images` or `services`
/// * `allowed` - Glob patterns; empty allows every image
/// * `internal` - Exact names that are always accepted
pub fn verify_allowed_image(
    logger: &BuildLogger,
    image: &str,
    option: &str,
    allowed: &[String],
    internal: &[String],
) -> Result<()> {
    match allowlist::verify_allowed_image(image, option, allowed, internal) {
        Ok(()) => Ok(()),
        Err(err @ AllowlistError::NotAllowed { .. }) => {
            logger.println("");
            logger.errorln(&format!(
                "The {} is not present on list of allowed {}",
                image, option
            ));
            for pattern in allowed {
                logger.println(&format!("- {}", pattern));
            }
            logger.println("");
            logger.println(ALLOWED_IMAGES_HELP);
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// Expands `$VAR` references in an image name and checks the result
///
/// An empty name selects the runner's default image. The default image is
/// always allowed.
pub fn expand_image_name(
    context: &JobContext,
    name: &str,
    allowed_internal: &[String],
) -> Result<String> {
    let default_image = context.expand(&context.docker().image);

    if !name.is_empty() {
        let image = context.expand(name);
        let mut internal = allowed_internal.to_vec();
        internal.push(default_image);
        verify_allowed_image(
            &context.logger,
            &image,
            "images",
            &context.docker().allowed_images,
            &internal,
        )?;
        return Ok(image);
    }

    if default_image.is_empty() {
        return Err(ExecutorError::ScriptFailure(
            "no Docker image specified to run the build in".to_string(),
        ));
    }

    context
        .logger
        .debugln(&format!("Using default image {}", default_image));
    Ok(default_image)
}
