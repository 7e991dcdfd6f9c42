//! Chart upload inspection.
//!
//! Chart uploads arrive either as a multipart form with a `chart` file part
//! or as a raw `.tgz` body. The chart name and version are read from the
//! top-level `Chart.yaml` inside the archive.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use flate2::read::GzDecoder;
use std::io::Read;

/// Name and version of an uploaded chart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartVersion {
    pub name: String,
    pub version: String,
}

/// Extracts the chart name and version from an upload body.
#[async_trait]
pub trait ChartInspector: Send + Sync {
    async fn inspect(&self, content_type: &str, body: Bytes) -> ApiResult<ChartVersion>;
}

/// Multipart or raw gzip tarball inspector.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultChartInspector;

const CHART_FIELD: &str = "chart";
const CHART_MANIFEST: &str = "Chart.yaml";

#[async_trait]
impl ChartInspector for DefaultChartInspector {
    async fn inspect(&self, content_type: &str, body: Bytes) -> ApiResult<ChartVersion> {
        let archive = if content_type.starts_with("multipart/form-data") {
            chart_part(content_type, body).await?
        } else {
            body
        };
        read_chart_archive(&archive)
    }
}

async fn chart_part(content_type: &str, body: Bytes) -> ApiResult<Bytes> {
    let req = Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some(CHART_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("invalid chart part: {e}")));
        }
    }
    Err(ApiError::BadRequest("multipart body has no chart part".to_string()))
}

/// Read `<chart>/Chart.yaml` from a gzip tarball.
pub fn read_chart_archive(data: &[u8]) -> ApiResult<ChartVersion> {
    let bad = |e: std::io::Error| ApiError::BadRequest(format!("invalid chart archive: {e}"));
    let mut archive = tar::Archive::new(GzDecoder::new(data));

    for entry in archive.entries().map_err(bad)? {
        let mut entry = entry.map_err(bad)?;
        let path = entry.path().map_err(bad)?.into_owned();
        let components: Vec<_> = path.components().collect();
        if components.len() != 2 || path.file_name().and_then(|n| n.to_str()) != Some(CHART_MANIFEST)
        {
            continue;
        }

        let mut manifest = String::new();
        entry.read_to_string(&mut manifest).map_err(bad)?;
        return parse_chart_manifest(&manifest);
    }

    Err(ApiError::BadRequest(format!(
        "chart archive has no {CHART_MANIFEST}"
    )))
}

/// Pull top-level `name` and `version` out of a `Chart.yaml`.
pub fn parse_chart_manifest(manifest: &str) -> ApiResult<ChartVersion> {
    let mut name = None;
    let mut version = None;

    for line in manifest.lines() {
        if line.starts_with([' ', '\t', '#', '-']) {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = scalar(value);
        match key.trim() {
            "name" if !value.is_empty() => name = Some(value),
            "version" if !value.is_empty() => version = Some(value),
            _ => {}
        }
    }

    match (name, version) {
        (Some(name), Some(version)) => Ok(ChartVersion { name, version }),
        _ => Err(ApiError::BadRequest(format!(
            "{CHART_MANIFEST} must declare name and version"
        ))),
    }
}

fn scalar(raw: &str) -> String {
    let value = raw.trim();
    let value = match value.find(" #") {
        Some(idx) => value[..idx].trim_end(),
        None => value,
    };
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    pub(crate) fn chart_tgz(name: &str, version: &str) -> Vec<u8> {
        let manifest = format!("apiVersion: v2\nname: {name}\nversion: \"{version}\"\n");
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{name}/Chart.yaml"), manifest.as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_parse_chart_manifest() {
        let chart = parse_chart_manifest(
            "apiVersion: v2\nname: nginx # web server\nversion: '1.2.0'\ndependencies:\n  - name: common\n    version: 2.0.0\n",
        )
        .unwrap();
        assert_eq!(
            chart,
            ChartVersion {
                name: "nginx".to_string(),
                version: "1.2.0".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_chart_manifest_requires_both() {
        assert!(parse_chart_manifest("name: nginx\n").is_err());
    }

    #[test]
    fn test_read_chart_archive() {
        let chart = read_chart_archive(&chart_tgz("redis", "7.0.1")).unwrap();
        assert_eq!(chart.name, "redis");
        assert_eq!(chart.version, "7.0.1");
    }

    #[test]
    fn test_read_chart_archive_rejects_garbage() {
        assert!(read_chart_archive(b"not a tarball").is_err());
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"chart\"; filename=\"nginx-1.0.0.tgz\"\r\nContent-Type: application/gzip\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&chart_tgz("nginx", "1.0.0"));
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let chart = DefaultChartInspector
            .inspect(
                &format!("multipart/form-data; boundary={boundary}"),
                Bytes::from(body),
            )
            .await
            .unwrap();
        assert_eq!(chart.name, "nginx");
        assert_eq!(chart.version, "1.0.0");
    }
}
