//! # Resource Compilers
//!
//! Side-effect-free transforms from a [`Scope`] to the desired state of each
//! generated object. `None` means the object is not desired and any existing
//! copy should be removed.
//!
//! | object | name |
//! |---|---|
//! | RequestAuthentication | `<policy>` |
//! | AuthorizationPolicy (deny) | `<policy>-deny-auth-rules` |
//! | AuthorizationPolicy (ignore) | `<policy>-ignore-auth` |
//! | AuthorizationPolicy (require) | `<policy>-require-auth` |
//! | EnvoyFilter | `<policy>-login` |
//! | Secret | `<policy>-envoy-secret` |

pub mod authorization_policy;
pub mod envoy_filter;
pub mod istio;
pub mod lua;
pub mod request_authentication;
pub mod secret;

use crate::constants::{
    CONTROLLER_NAME, DENY_POLICY_SUFFIX, ENVOY_SECRET_SUFFIX, IGNORE_POLICY_SUFFIX,
    LOGIN_FILTER_SUFFIX, MANAGED_BY_LABEL, REQUIRE_POLICY_SUFFIX,
};
use crate::controller::reconciler::scope::Scope;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use thiserror::Error;

/// A desired object could not be rendered.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to render {what}: {source}")]
    Render {
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to generate a random HMAC secret: {0}")]
    Random(String),
    #[error("token endpoint {0} is not an absolute URL")]
    TokenEndpoint(String),
}

impl ResourceError {
    /// Kind and name of the generated object that failed to render
    #[must_use]
    pub fn object(&self, policy: &str) -> (&'static str, String) {
        match self {
            ResourceError::Render { .. } | ResourceError::Random(_) => {
                ("Secret", envoy_secret_name(policy))
            }
            ResourceError::TokenEndpoint(_) => ("EnvoyFilter", login_filter_name(policy)),
        }
    }
}

#[must_use]
pub fn deny_policy_name(policy: &str) -> String {
    format!("{policy}{DENY_POLICY_SUFFIX}")
}

#[must_use]
pub fn ignore_policy_name(policy: &str) -> String {
    format!("{policy}{IGNORE_POLICY_SUFFIX}")
}

#[must_use]
pub fn require_policy_name(policy: &str) -> String {
    format!("{policy}{REQUIRE_POLICY_SUFFIX}")
}

#[must_use]
pub fn login_filter_name(policy: &str) -> String {
    format!("{policy}{LOGIN_FILTER_SUFFIX}")
}

#[must_use]
pub fn envoy_secret_name(policy: &str) -> String {
    format!("{policy}{ENVOY_SECRET_SUFFIX}")
}

/// Metadata shared by every generated object. The owner reference is set
/// when the object is created.
#[must_use]
pub fn object_meta(scope: &Scope, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(scope.namespace().to_string()),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            CONTROLLER_NAME.to_string(),
        )])),
        ..ObjectMeta::default()
    }
}

/// Workload selector in the form security objects expect
#[must_use]
pub fn workload_selector(scope: &Scope) -> istio::WorkloadSelector {
    istio::WorkloadSelector {
        match_labels: scope.policy.spec.selector.match_labels.clone(),
    }
}
