//! Secret with the SDS documents the OAuth2 filter reads from the sidecar.

use super::{envoy_secret_name, object_meta, ResourceError};
use crate::constants::{HMAC_SECRET_FILE, TOKEN_SECRET_FILE};
use crate::controller::reconciler::scope::Scope;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use serde_json::json;
use std::collections::BTreeMap;

const HMAC_KEY_BYTES: usize = 32;

/// Base64 of 32 random bytes
pub fn generate_hmac_key() -> Result<String, ResourceError> {
    let mut key = [0u8; HMAC_KEY_BYTES];
    rustls::crypto::ring::default_provider()
        .secure_random
        .fill(&mut key)
        .map_err(|e| ResourceError::Random(format!("{e:?}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(key))
}

/// SDS document holding one generic secret
pub fn sds_document(name: &str, value: &str) -> Result<String, ResourceError> {
    let document = json!({
        "resources": [{
            "@type": "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret",
            "name": name,
            "generic_secret": {
                "secret": { "inline_string": value }
            }
        }]
    });
    serde_yaml::to_string(&document).map_err(|source| ResourceError::Render {
        what: "SDS secret",
        source,
    })
}

/// Desired Secret, or `None` unless auto-login is enabled on a valid,
/// enabled policy. `hmac_key` only lands in newly created Secrets; updates
/// touch the token document alone.
pub fn desired(scope: &Scope, hmac_key: &str) -> Result<Option<Secret>, ResourceError> {
    let Some(login) = scope.login() else {
        return Ok(None);
    };

    let data = BTreeMap::from([
        (
            TOKEN_SECRET_FILE.to_string(),
            ByteString(sds_document("token", &login.client.client_secret)?.into_bytes()),
        ),
        (
            HMAC_SECRET_FILE.to_string(),
            ByteString(sds_document("hmac", hmac_key)?.into_bytes()),
        ),
    ]);

    Ok(Some(Secret {
        metadata: object_meta(scope, &envoy_secret_name(scope.name())),
        data: Some(data),
        ..Secret::default()
    }))
}

fn token_document(secret: &Secret) -> Option<&ByteString> {
    secret.data.as_ref().and_then(|d| d.get(TOKEN_SECRET_FILE))
}

#[must_use]
pub fn should_update(current: &Secret, desired: &Secret) -> bool {
    token_document(current) != token_document(desired)
}

pub fn update_fields(current: &mut Secret, desired: &Secret) {
    let Some(token) = token_document(desired).cloned() else {
        return;
    };
    current
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(TOKEN_SECRET_FILE.to_string(), token);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::testing::{policy, scope, MINIMAL_SPEC};

    fn login_scope() -> Scope {
        scope(policy(&format!(
            "{MINIMAL_SPEC}  autoLogin:\n    enabled: true\n  oAuthCredentials:\n    secretRef: oauth\n    clientIDKey: id\n    clientSecretKey: secret\n"
        )))
    }

    #[test]
    fn test_hmac_key_is_32_bytes() {
        let key = generate_hmac_key().expect("random");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key)
            .expect("base64");
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_sds_document_shape() {
        let yaml = sds_document("token", "s3cr3t").expect("render");
        let parsed: serde_json::Value = serde_yaml::from_str(&yaml).expect("yaml");
        let resource = &parsed["resources"][0];
        assert_eq!(resource["name"], "token");
        assert_eq!(resource["generic_secret"]["secret"]["inline_string"], "s3cr3t");
    }

    #[test]
    fn test_secret_holds_both_documents() {
        let secret = desired(&login_scope(), "aG1hYw==").expect("render").expect("desired");
        assert_eq!(secret.metadata.name.as_deref(), Some("orders-envoy-secret"));
        let data = secret.data.expect("data");
        assert!(data.contains_key(TOKEN_SECRET_FILE));
        assert!(data.contains_key(HMAC_SECRET_FILE));
    }

    #[test]
    fn test_hmac_change_does_not_trigger_update() {
        let scope = login_scope();
        let current = desired(&scope, "Zmlyc3Q=").expect("render").expect("desired");
        let next = desired(&scope, "c2Vjb25k").expect("render").expect("desired");
        assert!(!should_update(&current, &next));
    }

    #[test]
    fn test_rotated_client_secret_updates_token_only() {
        let scope = login_scope();
        let mut current = desired(&scope, "Zmlyc3Q=").expect("render").expect("desired");
        let hmac_before = current.data.as_ref().and_then(|d| d.get(HMAC_SECRET_FILE)).cloned();

        let mut rotated = scope.clone();
        if let Some(login) = rotated.resolved.as_mut().and_then(|r| r.login.as_mut()) {
            login.client.client_secret = "rotated".to_string();
        }
        let next = desired(&rotated, "c2Vjb25k").expect("render").expect("desired");

        assert!(should_update(&current, &next));
        update_fields(&mut current, &next);
        assert!(!should_update(&current, &next));
        assert_eq!(
            current.data.as_ref().and_then(|d| d.get(HMAC_SECRET_FILE)).cloned(),
            hmac_before
        );
    }

    #[test]
    fn test_no_secret_without_login() {
        let scope = scope(policy(MINIMAL_SPEC));
        assert!(desired(&scope, "x").expect("render").is_none());
    }
}
