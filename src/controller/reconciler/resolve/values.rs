//! Values read from ConfigMaps and Secrets.

use super::ResolutionError;
use crate::controller::reconciler::store::ObjectStore;
use crate::crd::{AllowedAudience, KeyRef, ValueSource};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};

/// Non-empty value of `key` in ConfigMap `namespace/name`.
pub async fn config_map_value<S: ObjectStore>(
    store: &S,
    namespace: &str,
    key_ref: &KeyRef,
) -> Result<String, ResolutionError> {
    let config_map = store
        .get::<ConfigMap>(namespace, &key_ref.name)
        .await?
        .ok_or_else(|| ResolutionError::MissingObject {
            kind: "ConfigMap",
            namespace: namespace.to_string(),
            name: key_ref.name.clone(),
        })?;

    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(&key_ref.key))
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| ResolutionError::EmptyValue {
            kind: "ConfigMap",
            namespace: namespace.to_string(),
            name: key_ref.name.clone(),
            key: key_ref.key.clone(),
        })
}

/// Non-empty UTF-8 value of `key` in Secret `namespace/name`.
pub async fn secret_value<S: ObjectStore>(
    store: &S,
    namespace: &str,
    key_ref: &KeyRef,
) -> Result<String, ResolutionError> {
    let secret = store
        .get::<Secret>(namespace, &key_ref.name)
        .await?
        .ok_or_else(|| ResolutionError::MissingObject {
            kind: "Secret",
            namespace: namespace.to_string(),
            name: key_ref.name.clone(),
        })?;

    secret
        .data
        .as_ref()
        .and_then(|data| data.get(&key_ref.key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ResolutionError::EmptyValue {
            kind: "Secret",
            namespace: namespace.to_string(),
            name: key_ref.name.clone(),
            key: key_ref.key.clone(),
        })
}

async fn source_value<S: ObjectStore>(
    store: &S,
    namespace: &str,
    source: &ValueSource,
) -> Result<String, ResolutionError> {
    match (&source.config_map_key_ref, &source.secret_key_ref) {
        (Some(key_ref), None) => config_map_value(store, namespace, key_ref).await,
        (None, Some(key_ref)) => secret_value(store, namespace, key_ref).await,
        _ => Err(ResolutionError::AmbiguousSource),
    }
}

/// Resolve every audience in order.
pub async fn resolve_audiences<S: ObjectStore>(
    store: &S,
    namespace: &str,
    audiences: &[AllowedAudience],
) -> Result<Vec<String>, ResolutionError> {
    let mut resolved = Vec::with_capacity(audiences.len());
    for audience in audiences {
        let value = match (&audience.value, &audience.value_from) {
            (Some(value), None) if !value.is_empty() => value.clone(),
            (Some(_), None) => return Err(ResolutionError::EmptyAudience),
            (None, Some(source)) => source_value(store, namespace, source).await?,
            _ => return Err(ResolutionError::AmbiguousSource),
        };
        resolved.push(value);
    }
    Ok(resolved)
}
