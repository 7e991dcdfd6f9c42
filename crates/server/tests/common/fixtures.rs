//! Test fixtures for generating registry content.

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

pub const MEDIA_TYPE_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// `sha256:<hex>` digest of data.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// A schema2 image manifest referencing the given config and layers.
#[allow(dead_code)]
pub fn schema2_manifest(config: (&str, i64), layers: &[(&str, i64)]) -> Bytes {
    let layers: Vec<serde_json::Value> = layers
        .iter()
        .map(|(digest, size)| {
            serde_json::json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": size,
                "digest": digest,
            })
        })
        .collect();
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_SCHEMA2,
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": config.1,
            "digest": config.0,
        },
        "layers": layers,
    });
    Bytes::from(serde_json::to_vec(&manifest).unwrap())
}

/// A manifest with one layer whose content is derived from `seed`.
#[allow(dead_code)]
pub fn seeded_manifest(seed: u64) -> Bytes {
    let config = sha256_digest(&seeded_bytes(seed, 64));
    let layer = sha256_digest(&seeded_bytes(seed + 1, 64));
    schema2_manifest((&config, 64), &[(&layer, 64)])
}

/// A gzipped chart archive with a `Chart.yaml`.
#[allow(dead_code)]
pub fn chart_archive(name: &str, version: &str) -> Vec<u8> {
    let chart_yaml = format!("apiVersion: v2\nname: {name}\nversion: {version}\n");
    let values = "replicaCount: 1\n";

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in [
        (format!("{name}/Chart.yaml"), chart_yaml.as_str()),
        (format!("{name}/values.yaml"), values),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let a = seeded_bytes(42, 100);
        let b = seeded_bytes(42, 100);
        assert_eq!(a, b);

        let c = seeded_bytes(43, 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sha256_digest_format() {
        let digest = sha256_digest(b"");
        assert_eq!(
            digest,
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
