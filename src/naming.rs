use crate::image_reference::{Identifier, ImageReference, ParseError, Registry};

/// Returns true if the reference already points into the backup registry.
pub fn is_mirrored(source: &ImageReference, backup: &Registry) -> bool {
    source.registry() == backup
}

/// Maps a source image to its tag in the backup registry, e.g.:
/// nginx                                        -> <backup>/index_docker_io/library/nginx:latest
/// nginx:1.23                                   -> <backup>/index_docker_io/library/nginx:1.23
/// nginx@sha256:33cef...                        -> <backup>/index_docker_io/library/nginx:sha256_33cef...
/// grafana/grafana:main                         -> <backup>/index_docker_io/grafana/grafana:main
/// ghcr.io/timebertt/speedtest-exporter:v0.1.0  -> <backup>/ghcr_io/timebertt/speedtest-exporter:v0.1.0
///
/// Fails when the result is not a valid reference, e.g. a `sha512` digest exceeds the tag length.
pub fn destination(source: &ImageReference, backup: &Registry) -> Result<ImageReference, ParseError> {
    let repository = format!(
        "{}/{}",
        sanitize_registry(source.registry()),
        source.repository()
    );

    let tag = match source.identifier() {
        Identifier::Tag(tag) => tag.clone(),
        // ':' is not a valid tag character
        Identifier::Digest(digest) => digest.to_string().replace(':', "_"),
    };

    ImageReference::with_tag(backup.clone(), repository, tag)
}

fn sanitize_registry(registry: &Registry) -> String {
    registry.as_str().replace(['.', ':'], "_")
}
