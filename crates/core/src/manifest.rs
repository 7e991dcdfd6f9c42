//! Manifest media types and descriptor extraction.
//!
//! The proxy never generates manifests. It only needs to know a pushed
//! manifest's digest, size and the blobs it references so that storage can be
//! charged and reclaimed.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};

pub const MEDIA_TYPE_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const MEDIA_TYPE_SCHEMA1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const MEDIA_TYPE_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Strip parameters (`; charset=...`) from a content type.
pub fn base_media_type(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}

/// Whether the media type is a multi-platform manifest list or index.
pub fn is_manifest_list(content_type: &str) -> bool {
    matches!(
        base_media_type(content_type),
        MEDIA_TYPE_MANIFEST_LIST | MEDIA_TYPE_OCI_INDEX
    )
}

/// A reference from a manifest to a blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: i64,
    pub digest: Digest,
}

/// What the quota layer needs to know about a pushed manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestDescriptor {
    pub digest: Digest,
    pub media_type: String,
    pub size: i64,
    pub references: Vec<Descriptor>,
}

/// Turns a manifest body into a [`ManifestDescriptor`].
pub trait ManifestInspector: Send + Sync {
    fn inspect(&self, content_type: &str, body: &[u8]) -> crate::Result<ManifestDescriptor>;
}

/// Reads Docker schema1, Docker schema2 and OCI image manifests.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultManifestInspector;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageManifest {
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Schema1Manifest {
    #[serde(default)]
    fs_layers: Vec<FsLayer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FsLayer {
    blob_sum: Digest,
}

impl ManifestInspector for DefaultManifestInspector {
    fn inspect(&self, content_type: &str, body: &[u8]) -> crate::Result<ManifestDescriptor> {
        let media_type = base_media_type(content_type);

        let references = match media_type {
            MEDIA_TYPE_SCHEMA2 | MEDIA_TYPE_OCI_MANIFEST => {
                let manifest: ImageManifest = serde_json::from_slice(body)
                    .map_err(|e| crate::Error::InvalidManifest(e.to_string()))?;
                manifest.config.into_iter().chain(manifest.layers).collect()
            }
            MEDIA_TYPE_SCHEMA1 | MEDIA_TYPE_SCHEMA1_SIGNED => {
                let manifest: Schema1Manifest = serde_json::from_slice(body)
                    .map_err(|e| crate::Error::InvalidManifest(e.to_string()))?;
                let mut seen = std::collections::HashSet::new();
                manifest
                    .fs_layers
                    .into_iter()
                    .filter(|l| seen.insert(l.blob_sum.clone()))
                    .map(|l| Descriptor {
                        media_type: String::new(),
                        size: 0,
                        digest: l.blob_sum,
                    })
                    .collect()
            }
            other => return Err(crate::Error::UnsupportedMediaType(other.to_string())),
        };

        Ok(ManifestDescriptor {
            digest: Digest::sha256_of(body),
            media_type: media_type.to_string(),
            size: body.len() as i64,
            references,
        })
    }
}
