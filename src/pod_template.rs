use crate::copier::ImageCopier;
use crate::error::{Error, Result};
use crate::image_reference::{ImageReference, Registry};
use crate::naming::{destination, is_mirrored};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use tracing::{debug, info};

/// Copies the image of every container in `template` that does not reference the backup
/// registry yet, and points the container at the copy. Containers are handled one at a time
/// in order; the first failure aborts and leaves the template partially rewritten, so the
/// caller has to discard it. Returns whether any container changed.
pub async fn rewrite<C: ImageCopier>(
    template: &mut PodTemplateSpec,
    backup: &Registry,
    copier: &C,
) -> Result<bool> {
    let Some(spec) = template.spec.as_mut() else {
        return Ok(false);
    };

    let mut changed = false;
    for container in spec.containers.iter_mut() {
        let Some(image) = container.image.as_deref() else {
            debug!("Container {} has no image, skipping", container.name);
            continue;
        };

        let source = ImageReference::parse(image).map_err(|source| Error::Parse {
            image: image.to_string(),
            source,
        })?;

        if is_mirrored(&source, backup) {
            debug!(
                "Image {} of container {} already references the backup registry",
                image, container.name
            );
            continue;
        }

        let target = destination(&source, backup).map_err(|cause| Error::Destination {
            source_image: source.to_string(),
            source: cause,
        })?;
        info!(
            "Copying image {} of container {} to the backup registry as {}",
            source, container.name, target
        );

        copier
            .copy(&source, &target)
            .await
            .map_err(|cause| Error::Transfer {
                source_image: source.to_string(),
                destination: target.to_string(),
                cause,
            })?;

        info!("Finished copying image {}", target);
        container.image = Some(target.to_string());
        changed = true;
    }

    Ok(changed)
}
