//! # Sidecar Secret Mount
//!
//! The login filter reads its OAuth2 secrets from files mounted into the
//! proxy sidecar. Pods opt in through two sidecar annotations; this check
//! makes sure the newest selected pod mounts the generated Secret.

use super::ValidationError;
use crate::constants::{
    ENVOY_SECRET_MOUNT_PATH, USER_VOLUME_ANNOTATION, USER_VOLUME_MOUNT_ANNOTATION,
};
use k8s_openapi::api::core::v1::Pod;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Deserialize)]
struct UserVolume {
    name: String,
    #[serde(default)]
    secret: Option<SecretVolume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretVolume {
    secret_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserVolumeMount {
    name: String,
    mount_path: String,
}

/// `k=v,k=v` form of a label map
#[must_use]
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn annotation<T: DeserializeOwned>(pod: &Pod, key: &str) -> Result<T, ValidationError> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .and_then(|raw| serde_json::from_str(raw).ok())
        .ok_or_else(|| ValidationError::MalformedAnnotation {
            annotation: key.to_string(),
        })
}

/// Check that the most recently created pod mounts `secret_name` into the
/// sidecar at the SDS config path.
pub fn validate_secret_mount(
    pods: &[Pod],
    selector: &BTreeMap<String, String>,
    secret_name: &str,
) -> Result<(), ValidationError> {
    let pod = pods
        .iter()
        .max_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
        })
        .ok_or_else(|| ValidationError::NoPods {
            selector: label_selector(selector),
        })?;

    let volumes: Vec<UserVolume> = annotation(pod, USER_VOLUME_ANNOTATION)?;
    let mounts: Vec<UserVolumeMount> = annotation(pod, USER_VOLUME_MOUNT_ANNOTATION)?;

    let secret_by_volume: HashMap<&str, &str> = volumes
        .iter()
        .filter_map(|v| v.secret.as_ref().map(|s| (v.name.as_str(), s.secret_name.as_str())))
        .collect();

    let mounted = mounts
        .iter()
        .filter(|m| m.mount_path == ENVOY_SECRET_MOUNT_PATH)
        .any(|m| secret_by_volume.get(m.name.as_str()) == Some(&secret_name));

    if mounted {
        Ok(())
    } else {
        Err(ValidationError::SecretNotMounted {
            secret: secret_name.to_string(),
            pod: pod.metadata.name.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn pod(name: &str, annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    fn selector() -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), "web".to_string())])
    }

    #[test]
    fn test_mounted_secret_passes() {
        let pods = [pod(
            "web-1",
            &[
                (
                    USER_VOLUME_ANNOTATION,
                    r#"[{"name":"oauth","secret":{"secretName":"web-envoy-secret"}}]"#,
                ),
                (
                    USER_VOLUME_MOUNT_ANNOTATION,
                    r#"[{"name":"oauth","mountPath":"/etc/istio/config","readonly":true}]"#,
                ),
            ],
        )];
        assert!(validate_secret_mount(&pods, &selector(), "web-envoy-secret").is_ok());
    }

    #[test]
    fn test_no_pods_is_an_error() {
        let err = validate_secret_mount(&[], &selector(), "web-envoy-secret").unwrap_err();
        assert!(err.to_string().contains("app=web"));
    }

    #[test]
    fn test_missing_annotation_is_reported() {
        let pods = [pod("web-1", &[])];
        let err = validate_secret_mount(&pods, &selector(), "web-envoy-secret").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedAnnotation { .. }));
    }

    #[test]
    fn test_wrong_mount_path_is_not_mounted() {
        let pods = [pod(
            "web-1",
            &[
                (
                    USER_VOLUME_ANNOTATION,
                    r#"[{"name":"oauth","secret":{"secretName":"web-envoy-secret"}}]"#,
                ),
                (
                    USER_VOLUME_MOUNT_ANNOTATION,
                    r#"[{"name":"oauth","mountPath":"/etc/other"}]"#,
                ),
            ],
        )];
        let err = validate_secret_mount(&pods, &selector(), "web-envoy-secret").unwrap_err();
        assert!(matches!(err, ValidationError::SecretNotMounted { .. }));
    }
}
