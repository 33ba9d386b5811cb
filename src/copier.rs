use crate::image_reference::{Identifier, ImageReference, Registry};
use anyhow::{Context, Result, bail};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

const ACCEPTED_MANIFEST_TYPES: [&str; 4] = [
    OCI_IMAGE_INDEX,
    OCI_IMAGE_MANIFEST,
    DOCKER_MANIFEST_LIST,
    DOCKER_MANIFEST,
];

/// Copies an image from one registry to another.
pub trait ImageCopier: Send + Sync {
    fn copy(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Registry-to-registry copier speaking the OCI distribution API with anonymous credentials.
/// Bearer token challenges are answered by `oci_distribution`.
pub struct RegistryCopier {
    insecure_registries: Vec<Registry>,
    timeout: Duration,
}

/// A manifest exactly as served by the source, so digests survive the copy.
struct RawManifest {
    body: Vec<u8>,
    content_type: String,
    manifest: OciManifest,
}

impl ImageCopier for RegistryCopier {
    async fn copy(&self, source: &ImageReference, destination: &ImageReference) -> Result<()> {
        tokio::time::timeout(self.timeout, self.copy_image(source, destination))
            .await
            .with_context(|| format!("Copying image timed out after {:?}", self.timeout))?
    }
}

impl RegistryCopier {
    pub fn new(insecure_registries: Vec<Registry>, timeout: Duration) -> Self {
        Self {
            insecure_registries,
            timeout,
        }
    }

    async fn copy_image(&self, source: &ImageReference, destination: &ImageReference) -> Result<()> {
        let client = Client::new(ClientConfig {
            protocol: self.protocol(&[source.registry(), destination.registry()]),
            ..Default::default()
        });
        let auth = RegistryAuth::Anonymous;
        let src = oci_reference(source);
        let dst = oci_reference(destination);

        let manifest = pull_manifest(&client, &src, &auth).await?;
        client
            .auth(&dst, &auth, RegistryOperation::Push)
            .await
            .with_context(|| format!("Failed to authenticate for push to {}", destination))?;

        match &manifest.manifest {
            OciManifest::ImageIndex(index) => {
                debug!(
                    "Image {} is an index of {} manifests",
                    source,
                    index.manifests.len()
                );
                for child in &index.manifests {
                    let child_src = with_digest(&src, &child.digest);
                    let child_manifest = pull_manifest(&client, &child_src, &auth).await?;
                    let OciManifest::Image(image) = &child_manifest.manifest else {
                        bail!("Nested image index {} is not supported", child.digest);
                    };
                    copy_blobs(&client, &child_src, &dst, image).await?;
                    push_manifest(&client, &with_digest(&dst, &child.digest), child_manifest)
                        .await?;
                }
            }
            OciManifest::Image(image) => copy_blobs(&client, &src, &dst, image).await?,
        }
        push_manifest(&client, &dst, manifest).await
    }

    /// Plain HTTP for the registries among `registries` that are insecure.
    fn protocol(&self, registries: &[&Registry]) -> ClientProtocol {
        let mut insecure: Vec<String> = self
            .insecure_registries
            .iter()
            .map(|registry| registry.to_string())
            .collect();
        insecure.extend(
            registries
                .iter()
                .filter(|registry| self.is_insecure(registry))
                .map(|registry| registry.to_string()),
        );
        ClientProtocol::HttpsExcept(insecure)
    }

    /// Registries reached over plain HTTP: configured ones plus local and private addresses.
    fn is_insecure(&self, registry: &Registry) -> bool {
        if self.insecure_registries.contains(registry) {
            return true;
        }

        let host = registry.host();
        host == "localhost"
            || host.ends_with(".local")
            || host
                .parse::<Ipv4Addr>()
                .is_ok_and(|ip| ip.is_loopback() || ip.is_private())
    }
}

fn oci_reference(image: &ImageReference) -> Reference {
    let registry = image.registry().to_string();
    let repository = image.repository().to_string();
    match image.identifier() {
        Identifier::Tag(tag) => Reference::with_tag(registry, repository, tag.clone()),
        Identifier::Digest(digest) => {
            Reference::with_digest(registry, repository, digest.to_string())
        }
    }
}

fn with_digest(reference: &Reference, digest: &str) -> Reference {
    Reference::with_digest(
        reference.registry().to_string(),
        reference.repository().to_string(),
        digest.to_string(),
    )
}

async fn pull_manifest(
    client: &Client,
    reference: &Reference,
    auth: &RegistryAuth,
) -> Result<RawManifest> {
    debug!("Fetching manifest {}", reference);
    let (body, _digest) = client
        .pull_manifest_raw(reference, auth, &ACCEPTED_MANIFEST_TYPES)
        .await
        .with_context(|| format!("Failed to pull manifest {}", reference))?;
    let body = body.to_vec();

    let manifest: OciManifest = serde_json::from_slice(&body)
        .with_context(|| format!("Failed to decode manifest {}", reference))?;
    let content_type = match &manifest {
        OciManifest::Image(image) => image.media_type.as_deref().unwrap_or(OCI_IMAGE_MANIFEST),
        OciManifest::ImageIndex(index) => index.media_type.as_deref().unwrap_or(OCI_IMAGE_INDEX),
    }
    .to_owned();

    Ok(RawManifest {
        body,
        content_type,
        manifest,
    })
}

async fn push_manifest(client: &Client, reference: &Reference, manifest: RawManifest) -> Result<()> {
    debug!("Pushing manifest {}", reference);
    let content_type = manifest
        .content_type
        .parse()
        .with_context(|| format!("Invalid manifest media type {}", manifest.content_type))?;
    client
        .push_manifest_raw(reference, manifest.body, content_type)
        .await
        .with_context(|| format!("Failed to push manifest {}", reference))?;
    Ok(())
}

async fn copy_blobs(
    client: &Client,
    src: &Reference,
    dst: &Reference,
    image: &OciImageManifest,
) -> Result<()> {
    for blob in std::iter::once(&image.config).chain(image.layers.iter()) {
        copy_blob(client, src, dst, blob).await?;
    }
    Ok(())
}

// TODO: stream blobs through a bounded buffer once large layers need it, pull_blob/push_blob
// hold one whole blob in memory.
async fn copy_blob(
    client: &Client,
    src: &Reference,
    dst: &Reference,
    blob: &OciDescriptor,
) -> Result<()> {
    let mut data = Vec::new();
    client
        .pull_blob(src, blob, &mut data)
        .await
        .with_context(|| format!("Failed to pull blob {} from {}", blob.digest, src))?;
    client
        .push_blob(dst, &data, &blob.digest)
        .await
        .with_context(|| format!("Failed to push blob {} to {}", blob.digest, dst))?;
    debug!("Copied blob {} to {}", blob.digest, dst);
    Ok(())
}
