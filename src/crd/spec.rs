//! # AuthPolicy Spec
//!
//! The user-facing intent: which workload to protect, which issuer to trust,
//! which paths require or bypass authentication, and whether unauthenticated
//! browsers are redirected into an OAuth2 login flow.

use crate::crd::AuthPolicyStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// AuthPolicy Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: auth.authpolicy.dev/v1alpha1
/// kind: AuthPolicy
/// metadata:
///   name: orders
///   namespace: shop
/// spec:
///   wellKnownURI: https://login.example.com/.well-known/openid-configuration
///   selector:
///     matchLabels:
///       app: orders
///   allowedAudiences:
///     - value: orders-api
///   authRules:
///     - paths: ["/admin/{**}"]
///       methods: ["GET", "POST"]
///       when:
///         - claim: groups
///           values: ["admins"]
///   ignoreAuthRules:
///     - paths: ["/health", "/public{**}"]
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "AuthPolicy",
    group = "auth.authpolicy.dev",
    version = "v1alpha1",
    namespaced,
    status = "AuthPolicyStatus",
    shortname = "ap",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}, {"name":"Message", "type":"string", "jsonPath":".status.message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicySpec {
    /// When false every generated object is removed
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// OpenID discovery document of the primary issuer
    #[serde(rename = "wellKnownURI")]
    pub well_known_uri: String,
    /// Workload the policy applies to
    pub selector: WorkloadSelector,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_audiences: Vec<AllowedAudience>,
    /// Extra audience resource indicators accepted in the `aud` claim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_resources: Vec<String>,
    /// Forward the original token to the workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_jwt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_cookies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_claim_to_headers: Option<Vec<ClaimToHeader>>,
    /// Claims required on every authenticated request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_auth: Option<BaselineAuth>,
    /// Explicit require rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_rules: Vec<RequestAuthRule>,
    /// Explicit bypass rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_auth_rules: Vec<RequestMatcher>,
    /// Further trusted issuers, each with its own rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_issuers: Vec<IssuerRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_login: Option<AutoLogin>,
    #[serde(
        default,
        rename = "oAuthCredentials",
        skip_serializing_if = "Option::is_none"
    )]
    pub oauth_credentials: Option<OAuthCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// HTTP methods a matcher may name
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
    Connect,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 9] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Trace,
        HttpMethod::Connect,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths plus optional methods. No methods means every method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatcher {
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<HttpMethod>,
}

impl RequestMatcher {
    pub fn new<P: Into<String>>(paths: impl IntoIterator<Item = P>, methods: &[HttpMethod]) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            methods: methods.to_vec(),
        }
    }

    /// Methods as wire strings
    #[must_use]
    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.as_str()).collect()
    }
}

/// Token claim that must contain one of `values`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCondition {
    pub claim: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthRule {
    #[serde(flatten)]
    pub matcher: RequestMatcher,
    /// Claim conditions, ORed within a claim and ANDed across claims
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<ClaimCondition>,
    /// Answer unauthenticated requests with 401 instead of a login redirect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_redirect: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BaselineAuth {
    #[serde(default)]
    pub claims: Vec<ClaimCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimToHeader {
    pub header: String,
    pub claim: String,
}

/// Audience given inline or read from a ConfigMap or Secret key
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllowedAudience {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValueSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeyRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyRef {
    pub name: String,
    pub key: String,
}

/// An additional trusted issuer with rules of its own
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRules {
    #[serde(rename = "wellKnownURI")]
    pub well_known_uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_audiences: Vec<AllowedAudience>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_rules: Vec<RequestAuthRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_auth_rules: Vec<RequestMatcher>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoLogin {
    #[serde(default)]
    pub enabled: bool,
    /// Path that starts the login flow explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_path: Option<String>,
    /// OAuth2 callback path, defaults to `/oauth2/callback`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_path: Option<String>,
    /// Defaults to `/logout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_path: Option<String>,
    #[serde(
        default,
        rename = "postLogoutRedirectURI",
        skip_serializing_if = "Option::is_none"
    )]
    pub post_logout_redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Extra query parameters appended to the authorization request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub login_params: BTreeMap<String, String>,
}

/// Secret holding the OAuth2 client credentials
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    pub secret_ref: String,
    #[serde(rename = "clientIDKey")]
    pub client_id_key: String,
    pub client_secret_key: String,
}

#[must_use]
pub fn default_true() -> bool {
    true
}

impl AuthPolicy {
    #[must_use]
    pub fn auto_login_enabled(&self) -> bool {
        self.spec.auto_login.as_ref().is_some_and(|a| a.enabled)
    }

    /// Every user-supplied path, for validation
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        let primary = matcher_paths(&self.spec.auth_rules, &self.spec.ignore_auth_rules);
        let additional = self
            .spec
            .additional_issuers
            .iter()
            .flat_map(|issuer| matcher_paths(&issuer.auth_rules, &issuer.ignore_auth_rules));
        let login = self.spec.auto_login.iter().flat_map(|a| {
            [&a.login_path, &a.redirect_path, &a.logout_path]
                .into_iter()
                .filter_map(|p| p.as_deref())
                .filter(|p| !p.is_empty())
        });
        primary.chain(additional).chain(login)
    }
}

fn matcher_paths<'a>(
    auth_rules: &'a [RequestAuthRule],
    ignore_rules: &'a [RequestMatcher],
) -> impl Iterator<Item = &'a str> {
    auth_rules
        .iter()
        .map(|r| &r.matcher)
        .chain(ignore_rules.iter())
        .flat_map(|m| m.paths.iter().map(String::as_str))
}
