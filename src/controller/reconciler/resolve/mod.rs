//! # Resolution
//!
//! Turns an `AuthPolicy` into the facts the compilers consume:
//!
//! 1. Static validation (selector, path templates, audience sources, credentials)
//! 2. Discovery documents for the primary and every additional issuer
//! 3. Audience and OAuth2 client values from ConfigMaps and Secrets
//! 4. Sidecar mount check for the login Secret when auto-login is on
//!
//! Any failure makes the policy invalid. The failure message is what the
//! user sees in the Invalid condition.

pub mod discovery;
pub mod pods;
pub mod values;

pub use discovery::{DiscoveryDocument, DiscoveryResolver, HttpDiscoveryResolver, IdentityProvider};

use crate::constants::{DEFAULT_LOGOUT_PATH, DEFAULT_REDIRECT_PATH, MAX_SELECTOR_BYTES};
use crate::controller::authz::IssuerPolicy;
use crate::controller::paths::{self, PathError};
use crate::controller::reconciler::scope::{
    AutoLoginConfig, JwtSource, LoginFlow, OAuthClient, ResolvedPolicy, Scope,
};
use crate::controller::reconciler::store::{ObjectStore, StoreError};
use crate::controller::resources::envoy_secret_name;
use crate::crd::{AllowedAudience, AuthPolicy, AutoLogin, KeyRef};
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tracing::{debug, warn};

/// The policy itself is malformed. Needs a spec change.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("selector is {size} bytes, at most {max} allowed", max = MAX_SELECTOR_BYTES)]
    SelectorTooLarge { size: usize },
    #[error("selector key '{0}' is not allowed")]
    InvalidSelectorKey(String),
    #[error("cannot define an audience as both string and ConfigMap/Secret ref")]
    AmbiguousAudience,
    #[error("oAuthCredentials must be set when autoLogin is enabled")]
    MissingOAuthCredentials,
    #[error("no pods found having the labels {selector}")]
    NoPods { selector: String },
    #[error(
        "the required annotation '{annotation}' is either missing or its content is not properly formatted"
    )]
    MalformedAnnotation { annotation: String },
    #[error("secret with name '{secret}' used by OAuth-EnvoyFilter is not mounted in istio-proxy of pod '{pod}'")]
    SecretNotMounted { secret: String, pod: String },
}

/// A referenced object or endpoint could not provide a value.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{kind} {namespace}/{name} was not found")]
    MissingObject {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("value from {kind} {namespace}/{name} key {key} is empty or missing")]
    EmptyValue {
        kind: &'static str,
        namespace: String,
        name: String,
        key: String,
    },
    #[error("audience value cannot be empty")]
    EmptyAudience,
    #[error("exactly one of configMapKeyRef and secretKeyRef must be set")]
    AmbiguousSource,
    #[error("failed to resolve discovery document from well-known uri {uri}: {message}")]
    DiscoveryUnavailable { uri: String, message: String },
    #[error("failed to parse discovery document from well-known uri {uri}")]
    MalformedDiscoveryDocument { uri: String },
    #[error(
        "issuer {issuer} does not support authorization endpoint or end session endpoint required for autologin"
    )]
    LoginUnsupported { issuer: String },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl From<PathError> for ResolveError {
    fn from(error: PathError) -> Self {
        ResolveError::Validation(ValidationError::Path(error))
    }
}

impl From<StoreError> for ResolveError {
    fn from(error: StoreError) -> Self {
        ResolveError::Resolution(ResolutionError::Store(error))
    }
}

/// Checks that need no I/O.
pub fn validate_policy(policy: &AuthPolicy) -> Result<(), ValidationError> {
    let labels = &policy.spec.selector.match_labels;
    let size: usize = labels.iter().map(|(k, v)| k.len() + v.len()).sum();
    if size > MAX_SELECTOR_BYTES {
        return Err(ValidationError::SelectorTooLarge { size });
    }
    if let Some(key) = labels.keys().find(|k| k.is_empty() || k.as_str() == "*") {
        return Err(ValidationError::InvalidSelectorKey(key.clone()));
    }

    paths::validate_all(policy.all_paths())?;

    let audiences = policy.spec.allowed_audiences.iter().chain(
        policy
            .spec
            .additional_issuers
            .iter()
            .flat_map(|i| i.allowed_audiences.iter()),
    );
    for audience in audiences {
        check_audience_source(audience)?;
    }

    if policy.auto_login_enabled() && policy.spec.oauth_credentials.is_none() {
        return Err(ValidationError::MissingOAuthCredentials);
    }
    Ok(())
}

fn check_audience_source(audience: &AllowedAudience) -> Result<(), ValidationError> {
    let from_both = audience.value_from.as_ref().is_some_and(|source| {
        source.config_map_key_ref.is_some() && source.secret_key_ref.is_some()
    });
    if (audience.value.is_some() && audience.value_from.is_some()) || from_both {
        return Err(ValidationError::AmbiguousAudience);
    }
    Ok(())
}

/// Auto-login settings with defaults for unset or empty paths
#[must_use]
pub fn auto_login_config(auto_login: &AutoLogin) -> AutoLoginConfig {
    let or_default = |value: &Option<String>, default: &str| {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
            .to_string()
    };
    AutoLoginConfig {
        login_path: auto_login.login_path.clone().filter(|p| !p.is_empty()),
        redirect_path: or_default(&auto_login.redirect_path, DEFAULT_REDIRECT_PATH),
        logout_path: or_default(&auto_login.logout_path, DEFAULT_LOGOUT_PATH),
        post_logout_redirect_uri: auto_login.post_logout_redirect_uri.clone(),
        scopes: auto_login.scopes.clone(),
        login_params: auto_login.login_params.clone(),
    }
}

/// Resolve every external fact of a policy.
pub async fn resolve_policy<S, D>(
    store: &S,
    discovery: &D,
    policy: &AuthPolicy,
) -> Result<ResolvedPolicy, ResolveError>
where
    S: ObjectStore,
    D: DiscoveryResolver + ?Sized,
{
    validate_policy(policy)?;

    let namespace = policy.metadata.namespace.as_deref().unwrap_or("default");
    let name = policy.metadata.name.as_deref().unwrap_or_default();
    let login_enabled = policy.auto_login_enabled();
    let spec = &policy.spec;

    let primary = discovery
        .resolve(&spec.well_known_uri)
        .await?
        .into_provider(&spec.well_known_uri, login_enabled)?;

    let primary_audiences = values::resolve_audiences(store, namespace, &spec.allowed_audiences).await?;
    let mut issuers = vec![IssuerPolicy {
        issuer: primary.issuer.clone(),
        accepted_resources: concat(&primary_audiences, &spec.accepted_resources),
        auth_rules: spec.auth_rules.clone(),
        ignore_rules: spec.ignore_auth_rules.clone(),
    }];
    let mut jwt_sources = vec![JwtSource {
        issuer: primary.issuer.clone(),
        jwks_uri: primary.jwks_uri.clone(),
        audiences: primary_audiences,
    }];

    for additional in &spec.additional_issuers {
        let provider = discovery
            .resolve(&additional.well_known_uri)
            .await?
            .into_provider(&additional.well_known_uri, false)?;
        let audiences =
            values::resolve_audiences(store, namespace, &additional.allowed_audiences).await?;
        issuers.push(IssuerPolicy {
            issuer: provider.issuer.clone(),
            accepted_resources: concat(&audiences, &additional.accepted_resources),
            auth_rules: additional.auth_rules.clone(),
            ignore_rules: additional.ignore_auth_rules.clone(),
        });
        jwt_sources.push(JwtSource {
            issuer: provider.issuer,
            jwks_uri: provider.jwks_uri,
            audiences,
        });
    }

    let login = match (&spec.auto_login, &spec.oauth_credentials) {
        (Some(auto_login), Some(credentials)) if auto_login.enabled => {
            let client = OAuthClient {
                client_id: values::secret_value(
                    store,
                    namespace,
                    &KeyRef {
                        name: credentials.secret_ref.clone(),
                        key: credentials.client_id_key.clone(),
                    },
                )
                .await?,
                client_secret: values::secret_value(
                    store,
                    namespace,
                    &KeyRef {
                        name: credentials.secret_ref.clone(),
                        key: credentials.client_secret_key.clone(),
                    },
                )
                .await?,
            };

            if token_endpoint_host(&primary.token_endpoint).is_none() {
                return Err(ResolutionError::MalformedDiscoveryDocument {
                    uri: spec.well_known_uri.clone(),
                }
                .into());
            }

            let selector = &spec.selector.match_labels;
            let pods: Vec<Pod> = store
                .list(namespace, &pods::label_selector(selector))
                .await?;
            pods::validate_secret_mount(&pods, selector, &envoy_secret_name(name))?;

            Some(LoginFlow {
                config: auto_login_config(auto_login),
                client,
                token_endpoint: primary.token_endpoint.clone(),
                authorization_endpoint: primary.authorization_endpoint.clone().unwrap_or_default(),
                end_session_endpoint: primary.end_session_endpoint.clone().unwrap_or_default(),
            })
        }
        _ => None,
    };

    debug!(
        "Resolved {} issuer(s) for AuthPolicy {}/{}",
        issuers.len(),
        namespace,
        name
    );

    Ok(ResolvedPolicy {
        issuers,
        jwt_sources,
        login,
    })
}

/// Resolve into a scope. Failures produce an invalid scope.
pub async fn build_scope<S, D>(store: &S, discovery: &D, policy: AuthPolicy) -> Scope
where
    S: ObjectStore,
    D: DiscoveryResolver + ?Sized,
{
    match resolve_policy(store, discovery, &policy).await {
        Ok(resolved) => Scope::valid(policy, resolved),
        Err(error) => {
            warn!(
                "AuthPolicy {}/{} is invalid: {}",
                policy.metadata.namespace.as_deref().unwrap_or("default"),
                policy.metadata.name.as_deref().unwrap_or_default(),
                error
            );
            Scope::invalid(policy, error.to_string())
        }
    }
}

/// Host of an absolute token endpoint URL
#[must_use]
pub fn token_endpoint_host(token_endpoint: &str) -> Option<String> {
    reqwest::Url::parse(token_endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .filter(|host| !host.is_empty())
}

fn concat(audiences: &[String], accepted_resources: &[String]) -> Vec<String> {
    let mut all = audiences.to_vec();
    all.extend(accepted_resources.iter().cloned());
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthPolicySpec, RequestMatcher, ValueSource, WorkloadSelector};
    use std::collections::BTreeMap;

    fn policy() -> AuthPolicy {
        let spec: AuthPolicySpec = serde_yaml::from_str(
            r#"
wellKnownURI: https://idp/.well-known/openid-configuration
selector:
  matchLabels:
    app: web
"#,
        )
        .expect("spec");
        AuthPolicy::new("web", spec)
    }

    #[test]
    fn test_valid_policy_passes() {
        assert!(validate_policy(&policy()).is_ok());
    }

    #[test]
    fn test_wildcard_selector_key_rejected() {
        let mut p = policy();
        p.spec.selector = WorkloadSelector {
            match_labels: BTreeMap::from([("*".to_string(), "x".to_string())]),
        };
        assert!(matches!(
            validate_policy(&p),
            Err(ValidationError::InvalidSelectorKey(_))
        ));
    }

    #[test]
    fn test_oversized_selector_rejected() {
        let mut p = policy();
        p.spec
            .selector
            .match_labels
            .insert("big".to_string(), "x".repeat(MAX_SELECTOR_BYTES));
        assert!(matches!(
            validate_policy(&p),
            Err(ValidationError::SelectorTooLarge { .. })
        ));
    }

    #[test]
    fn test_bad_path_rejected() {
        let mut p = policy();
        p.spec.ignore_auth_rules = vec![RequestMatcher::new(["/a/{**}/b/{*}"], &[])];
        assert!(matches!(validate_policy(&p), Err(ValidationError::Path(_))));
    }

    #[test]
    fn test_audience_with_two_sources_rejected() {
        let mut p = policy();
        p.spec.allowed_audiences = vec![AllowedAudience {
            value: Some("a".to_string()),
            value_from: Some(ValueSource::default()),
        }];
        assert!(matches!(
            validate_policy(&p),
            Err(ValidationError::AmbiguousAudience)
        ));
    }

    #[test]
    fn test_auto_login_without_credentials_rejected() {
        let mut p = policy();
        p.spec.auto_login = Some(AutoLogin {
            enabled: true,
            ..AutoLogin::default()
        });
        assert!(matches!(
            validate_policy(&p),
            Err(ValidationError::MissingOAuthCredentials)
        ));
    }

    #[test]
    fn test_empty_login_paths_fall_back_to_defaults() {
        let mut p = policy();
        p.spec.auto_login = Some(AutoLogin {
            enabled: false,
            redirect_path: Some(String::new()),
            logout_path: Some(String::new()),
            login_path: Some(String::new()),
            ..AutoLogin::default()
        });
        assert!(validate_policy(&p).is_ok());

        p.spec.auto_login = Some(AutoLogin {
            enabled: false,
            redirect_path: Some("callback".to_string()),
            ..AutoLogin::default()
        });
        assert!(matches!(validate_policy(&p), Err(ValidationError::Path(_))));
    }

    #[test]
    fn test_token_endpoint_host() {
        assert_eq!(
            token_endpoint_host("https://idp.example.com/oauth2/token").as_deref(),
            Some("idp.example.com")
        );
        assert_eq!(token_endpoint_host("/oauth2/token"), None);
    }

    #[test]
    fn test_auto_login_defaults() {
        let config = auto_login_config(&AutoLogin {
            enabled: true,
            redirect_path: Some(String::new()),
            ..AutoLogin::default()
        });
        assert_eq!(config.redirect_path, "/oauth2/callback");
        assert_eq!(config.logout_path, "/logout");
        assert_eq!(config.login_path, None);
    }
}
