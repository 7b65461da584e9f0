//! Auto-login: OAuth credentials, the sidecar secret mount and the login
//! filter objects.

mod common;

use authpolicy_controller::constants::{HMAC_SECRET_FILE, TOKEN_SECRET_FILE};
use authpolicy_controller::controller::resources::istio::EnvoyFilter;
use authpolicy_controller::crd::Phase;
use common::{Harness, MINIMAL_SPEC, NAMESPACE};
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

fn login_spec() -> String {
    format!(
        "{MINIMAL_SPEC}  autoLogin:\n    enabled: true\n    loginPath: /login\n    scopes: [openid]\n  oAuthCredentials:\n    secretRef: oauth\n    clientIDKey: id\n    clientSecretKey: secret\n"
    )
}

fn oauth_secret(client_secret: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("oauth".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([
            ("id".to_string(), ByteString(b"orders-client".to_vec())),
            ("secret".to_string(), ByteString(client_secret.as_bytes().to_vec())),
        ])),
        ..Secret::default()
    }
}

fn mounted_pod() -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some("orders-7d9f".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "orders".to_string())])),
            annotations: Some(BTreeMap::from([
                (
                    "sidecar.istio.io/userVolume".to_string(),
                    r#"[{"name":"envoy-secret","secret":{"secretName":"orders-envoy-secret"}}]"#
                        .to_string(),
                ),
                (
                    "sidecar.istio.io/userVolumeMount".to_string(),
                    r#"[{"name":"envoy-secret","mountPath":"/etc/istio/config"}]"#.to_string(),
                ),
            ])),
            ..ObjectMeta::default()
        },
        ..Pod::default()
    }
}

fn document(secret: &Secret, file: &str) -> String {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(file))
        .expect("secret document")
        .0
        .clone();
    String::from_utf8(bytes).expect("utf-8 document")
}

#[tokio::test]
async fn test_login_creates_secret_and_filter() {
    let harness = Harness::new();
    harness.store().insert(oauth_secret("s3cr3t"));
    harness.store().insert(mounted_pod());
    harness.seed_policy(&login_spec());

    harness.reconcile().await.expect("pass");

    let secret = harness
        .store()
        .fetch::<Secret>("orders-envoy-secret")
        .expect("envoy secret");
    assert!(document(&secret, TOKEN_SECRET_FILE).contains("s3cr3t"));
    assert!(secret
        .data
        .as_ref()
        .is_some_and(|d| d.contains_key(HMAC_SECRET_FILE)));
    assert!(harness.store().contains::<EnvoyFilter>("orders-login"));
    assert_eq!(
        harness.policy().status.and_then(|s| s.phase),
        Some(Phase::Ready)
    );
}

#[tokio::test]
async fn test_rotated_client_secret_keeps_hmac_key() {
    let harness = Harness::new();
    harness.store().insert(oauth_secret("s3cr3t"));
    harness.store().insert(mounted_pod());
    harness.seed_policy(&login_spec());
    harness.reconcile().await.expect("first pass");
    let before = harness
        .store()
        .fetch::<Secret>("orders-envoy-secret")
        .expect("envoy secret");

    harness.store().insert(oauth_secret("rotated"));
    harness.reconcile().await.expect("second pass");

    let after = harness
        .store()
        .fetch::<Secret>("orders-envoy-secret")
        .expect("envoy secret");
    assert!(document(&after, TOKEN_SECRET_FILE).contains("rotated"));
    assert_eq!(
        document(&before, HMAC_SECRET_FILE),
        document(&after, HMAC_SECRET_FILE)
    );
}

#[tokio::test]
async fn test_login_without_pods_is_invalid() {
    let harness = Harness::new();
    harness.store().insert(oauth_secret("s3cr3t"));
    harness.seed_policy(&login_spec());

    harness.reconcile().await.expect("pass");

    let status = harness.policy().status.expect("status");
    assert_eq!(status.phase, Some(Phase::Invalid));
    assert_eq!(
        status.message.as_deref(),
        Some("no pods found having the labels app=orders")
    );
    assert!(!harness.store().contains::<Secret>("orders-envoy-secret"));
    assert!(!harness.store().contains::<EnvoyFilter>("orders-login"));
}

#[tokio::test]
async fn test_missing_credentials_secret_is_invalid() {
    let harness = Harness::new();
    harness.store().insert(mounted_pod());
    harness.seed_policy(&login_spec());

    harness.reconcile().await.expect("pass");

    let status = harness.policy().status.expect("status");
    assert_eq!(status.phase, Some(Phase::Invalid));
    assert_eq!(
        status.message.as_deref(),
        Some("Secret shop/oauth was not found")
    );
}
