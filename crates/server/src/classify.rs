//! Request classifiers.
//!
//! Maps method + path (+ query) of an inbound request onto the registry or
//! chart operation it performs. Paths are expected to be slash-normalized.

use axum::extract::Query;
use axum::http::{Method, Uri};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

const REPOSITORY: &str = r"((?:[a-z0-9]+(?:[._-][a-z0-9]+)*/)+)";

/// A digest (`algorithm:hex`, any registered algorithm) or a tag.
const REFERENCE: &str = r"((?:[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,})|[\w][\w.-]{0,127})";

static MANIFEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^/v2/{REPOSITORY}manifests/{REFERENCE}/?$"))
        .expect("manifest pattern")
});

static BLOB_UPLOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^/v2/{REPOSITORY}blobs/uploads/([a-zA-Z0-9_.=-]+)/?$"))
        .expect("blob upload pattern")
});

static BLOB_UPLOAD_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^/v2/{REPOSITORY}blobs/uploads/?$")).expect("blob upload start pattern")
});

static CHART_UPLOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/chartrepo/([^?#/]+)/charts/?$").expect("chart upload pattern")
});

static CHART_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/chartrepo/([^?#/]+)/charts/([^?#/]+)/([^?#/]+)/?$")
        .expect("chart version pattern")
});

const CATALOG_PATH: &str = "/v2/_catalog";

/// A classified registry or chart operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    PushManifest { repository: String, reference: String },
    PullManifest { repository: String, reference: String },
    DeleteManifest { repository: String, reference: String },
    PatchBlob { repository: String, uuid: String },
    /// Upload completion. `digest` is the raw query value, not yet validated.
    PutBlob {
        repository: String,
        uuid: String,
        digest: String,
    },
    MountBlob {
        repository: String,
        digest: String,
        from: String,
    },
    ChartUpload { namespace: String },
    ChartDelete {
        namespace: String,
        name: String,
        version: String,
    },
    CatalogList,
}

impl Operation {
    /// Short name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PushManifest { .. } => "push_manifest",
            Self::PullManifest { .. } => "pull_manifest",
            Self::DeleteManifest { .. } => "delete_manifest",
            Self::PatchBlob { .. } => "patch_blob",
            Self::PutBlob { .. } => "put_blob",
            Self::MountBlob { .. } => "mount_blob",
            Self::ChartUpload { .. } => "chart_upload",
            Self::ChartDelete { .. } => "chart_delete",
            Self::CatalogList => "catalog_list",
        }
    }
}

fn repository(captured: &str) -> String {
    captured.trim_end_matches('/').to_string()
}

fn query(uri: &Uri) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(q)| q)
        .unwrap_or_default()
}

/// Classify a request. Returns `None` for anything the proxy only forwards.
pub fn classify(method: &Method, uri: &Uri) -> Option<Operation> {
    let path = uri.path();

    if let Some(caps) = MANIFEST_RE.captures(path) {
        let repository = repository(&caps[1]);
        let reference = caps[2].to_string();
        return match *method {
            Method::PUT => Some(Operation::PushManifest {
                repository,
                reference,
            }),
            Method::GET => Some(Operation::PullManifest {
                repository,
                reference,
            }),
            Method::DELETE => Some(Operation::DeleteManifest {
                repository,
                reference,
            }),
            _ => None,
        };
    }

    if let Some(caps) = BLOB_UPLOAD_RE.captures(path) {
        let repository = repository(&caps[1]);
        let uuid = caps[2].to_string();
        return match *method {
            Method::PATCH => Some(Operation::PatchBlob { repository, uuid }),
            Method::PUT => {
                let digest = query(uri).remove("digest")?;
                Some(Operation::PutBlob {
                    repository,
                    uuid,
                    digest,
                })
            }
            _ => None,
        };
    }

    if *method == Method::POST
        && let Some(caps) = BLOB_UPLOAD_START_RE.captures(path)
    {
        let mut params = query(uri);
        let digest = params.remove("mount")?;
        let from = params.remove("from")?;
        return Some(Operation::MountBlob {
            repository: repository(&caps[1]),
            digest,
            from,
        });
    }

    if *method == Method::POST
        && let Some(caps) = CHART_UPLOAD_RE.captures(path)
    {
        return Some(Operation::ChartUpload {
            namespace: caps[1].to_string(),
        });
    }

    if *method == Method::DELETE
        && let Some(caps) = CHART_VERSION_RE.captures(path)
    {
        return Some(Operation::ChartDelete {
            namespace: caps[1].to_string(),
            name: caps[2].to_string(),
            version: caps[3].to_string(),
        });
    }

    if *method == Method::GET && path == CATALOG_PATH {
        return Some(Operation::CatalogList);
    }

    None
}

/// Collapse runs of `/` in a path.
pub fn merge_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:4d0a1b8f1c2f7d6d3f3e5f7c8b9a0e1d2c3b4a5f6e7d8c9b0a1f2e3d4c5b6a79";

    fn op(method: Method, uri: &str) -> Option<Operation> {
        classify(&method, &uri.parse().unwrap())
    }

    #[test]
    fn test_manifest_operations() {
        assert_eq!(
            op(Method::PUT, "/v2/proj/img/manifests/latest"),
            Some(Operation::PushManifest {
                repository: "proj/img".to_string(),
                reference: "latest".to_string(),
            })
        );
        assert_eq!(
            op(Method::GET, "/v2/proj/team/img/manifests/v1.0"),
            Some(Operation::PullManifest {
                repository: "proj/team/img".to_string(),
                reference: "v1.0".to_string(),
            })
        );
        assert_eq!(
            op(Method::DELETE, &format!("/v2/proj/img/manifests/{DIGEST}")),
            Some(Operation::DeleteManifest {
                repository: "proj/img".to_string(),
                reference: DIGEST.to_string(),
            })
        );
        assert_eq!(op(Method::PATCH, "/v2/proj/img/manifests/latest"), None);
    }

    #[test]
    fn test_sha512_references() {
        let digest = format!("sha512:{}", "a".repeat(128));
        let uri = format!("/v2/proj/img/manifests/{digest}");
        assert_eq!(
            op(Method::PUT, &uri),
            Some(Operation::PushManifest {
                repository: "proj/img".to_string(),
                reference: digest.clone(),
            })
        );
        assert_eq!(
            op(Method::DELETE, &uri),
            Some(Operation::DeleteManifest {
                repository: "proj/img".to_string(),
                reference: digest,
            })
        );
    }

    #[test]
    fn test_reference_shapes() {
        assert!(op(Method::PUT, &format!("/v2/proj/img/manifests/{}", "t".repeat(128))).is_some());
        assert_eq!(op(Method::PUT, &format!("/v2/proj/img/manifests/{}", "t".repeat(129))), None);
        assert_eq!(op(Method::PUT, "/v2/proj/img/manifests/v1:2"), None);
        assert_eq!(op(Method::PUT, "/v2/proj/img/manifests/.hidden"), None);
    }

    #[test]
    fn test_repository_without_namespace_still_matches() {
        assert_eq!(
            op(Method::GET, "/v2/img/manifests/latest"),
            Some(Operation::PullManifest {
                repository: "img".to_string(),
                reference: "latest".to_string(),
            })
        );
    }

    #[test]
    fn test_uppercase_repository_is_not_classified() {
        assert_eq!(op(Method::PUT, "/v2/Proj/img/manifests/latest"), None);
    }

    #[test]
    fn test_blob_operations() {
        assert_eq!(
            op(Method::PATCH, "/v2/proj/img/blobs/uploads/3f1c-9a"),
            Some(Operation::PatchBlob {
                repository: "proj/img".to_string(),
                uuid: "3f1c-9a".to_string(),
            })
        );
        assert_eq!(
            op(
                Method::PUT,
                "/v2/proj/img/blobs/uploads/3f1c-9a?digest=sha256%3Aabc&_state=x"
            ),
            Some(Operation::PutBlob {
                repository: "proj/img".to_string(),
                uuid: "3f1c-9a".to_string(),
                digest: "sha256:abc".to_string(),
            })
        );
        assert_eq!(op(Method::PUT, "/v2/proj/img/blobs/uploads/3f1c-9a"), None);
    }

    #[test]
    fn test_mount_needs_both_parameters() {
        assert_eq!(
            op(
                Method::POST,
                &format!("/v2/proj/img/blobs/uploads/?mount={DIGEST}&from=other/img")
            ),
            Some(Operation::MountBlob {
                repository: "proj/img".to_string(),
                digest: DIGEST.to_string(),
                from: "other/img".to_string(),
            })
        );
        assert_eq!(op(Method::POST, "/v2/proj/img/blobs/uploads/"), None);
        assert_eq!(
            op(Method::POST, &format!("/v2/proj/img/blobs/uploads/?mount={DIGEST}")),
            None
        );
    }

    #[test]
    fn test_chart_operations() {
        assert_eq!(
            op(Method::POST, "/api/chartrepo/library/charts"),
            Some(Operation::ChartUpload {
                namespace: "library".to_string(),
            })
        );
        assert_eq!(
            op(Method::DELETE, "/api/chartrepo/library/charts/nginx/1.2.0"),
            Some(Operation::ChartDelete {
                namespace: "library".to_string(),
                name: "nginx".to_string(),
                version: "1.2.0".to_string(),
            })
        );
        assert_eq!(op(Method::GET, "/api/chartrepo/library/charts"), None);
    }

    #[test]
    fn test_catalog() {
        assert_eq!(op(Method::GET, "/v2/_catalog"), Some(Operation::CatalogList));
        assert_eq!(op(Method::GET, "/v2/_catalog?n=10"), Some(Operation::CatalogList));
        assert_eq!(op(Method::POST, "/v2/_catalog"), None);
    }

    #[test]
    fn test_merge_slashes() {
        assert_eq!(merge_slashes("//v2///proj//img/manifests/x"), "/v2/proj/img/manifests/x");
        assert_eq!(merge_slashes("/v2/"), "/v2/");
        assert_eq!(merge_slashes(""), "");
    }
}
