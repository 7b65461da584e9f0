//! RequestAuthentication: one JWT rule per trusted issuer.

use super::istio::{
    ClaimToHeader, JwtRule, RequestAuthentication, RequestAuthenticationSpec,
};
use super::{object_meta, workload_selector};
use crate::controller::reconciler::scope::Scope;

/// Desired RequestAuthentication, or `None` when the policy is disabled or
/// could not be resolved.
#[must_use]
pub fn desired(scope: &Scope) -> Option<RequestAuthentication> {
    if !scope.enabled() {
        return None;
    }
    let resolved = scope.resolved.as_ref()?;
    let spec = &scope.policy.spec;

    let output_claim_to_headers: Vec<ClaimToHeader> = spec
        .output_claim_to_headers
        .iter()
        .flatten()
        .map(|c| ClaimToHeader {
            header: c.header.clone(),
            claim: c.claim.clone(),
        })
        .collect();

    let jwt_rules = resolved
        .jwt_sources
        .iter()
        .map(|source| JwtRule {
            issuer: source.issuer.clone(),
            audiences: source.audiences.clone(),
            jwks_uri: source.jwks_uri.clone(),
            forward_original_token: spec.forward_jwt,
            from_cookies: spec.from_cookies.clone().unwrap_or_default(),
            output_claim_to_headers: output_claim_to_headers.clone(),
        })
        .collect();

    Some(RequestAuthentication {
        metadata: object_meta(scope, scope.name()),
        spec: RequestAuthenticationSpec {
            selector: Some(workload_selector(scope)),
            jwt_rules,
        },
    })
}

#[must_use]
pub fn should_update(current: &RequestAuthentication, desired: &RequestAuthentication) -> bool {
    current.spec.selector != desired.spec.selector || current.spec.jwt_rules != desired.spec.jwt_rules
}

pub fn update_fields(current: &mut RequestAuthentication, desired: &RequestAuthentication) {
    current.spec.selector.clone_from(&desired.spec.selector);
    current.spec.jwt_rules.clone_from(&desired.spec.jwt_rules);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::scope::{JwtSource, ResolvedPolicy};
    use crate::crd::{AuthPolicy, AuthPolicySpec, ClaimToHeader as SpecClaimToHeader};

    fn scope(enabled: bool) -> Scope {
        let mut policy = AuthPolicy::new(
            "orders",
            AuthPolicySpec {
                enabled,
                well_known_uri: "https://idp/.well-known/openid-configuration".to_string(),
                selector: crate::crd::WorkloadSelector::default(),
                allowed_audiences: vec![],
                accepted_resources: vec![],
                forward_jwt: Some(true),
                from_cookies: Some(vec!["session".to_string()]),
                output_claim_to_headers: Some(vec![SpecClaimToHeader {
                    header: "x-user".to_string(),
                    claim: "sub".to_string(),
                }]),
                baseline_auth: None,
                auth_rules: vec![],
                ignore_auth_rules: vec![],
                additional_issuers: vec![],
                auto_login: None,
                oauth_credentials: None,
            },
        );
        policy.metadata.namespace = Some("shop".to_string());
        Scope::valid(
            policy,
            ResolvedPolicy {
                issuers: vec![],
                jwt_sources: vec![
                    JwtSource {
                        issuer: "https://idp".to_string(),
                        jwks_uri: "https://idp/jwks".to_string(),
                        audiences: vec!["orders-api".to_string()],
                    },
                    JwtSource {
                        issuer: "https://other".to_string(),
                        jwks_uri: "https://other/jwks".to_string(),
                        audiences: vec![],
                    },
                ],
                login: None,
            },
        )
    }

    #[test]
    fn test_one_jwt_rule_per_issuer() {
        let ra = desired(&scope(true)).expect("desired");
        assert_eq!(ra.metadata.name.as_deref(), Some("orders"));
        assert_eq!(ra.metadata.namespace.as_deref(), Some("shop"));
        assert_eq!(ra.spec.jwt_rules.len(), 2);
        let first = &ra.spec.jwt_rules[0];
        assert_eq!(first.issuer, "https://idp");
        assert_eq!(first.audiences, vec!["orders-api"]);
        assert_eq!(first.forward_original_token, Some(true));
        assert_eq!(first.from_cookies, vec!["session"]);
        assert_eq!(first.output_claim_to_headers[0].header, "x-user");
    }

    #[test]
    fn test_disabled_policy_has_no_request_authentication() {
        assert!(desired(&scope(false)).is_none());
    }

    #[test]
    fn test_update_ignores_metadata() {
        let desired = desired(&scope(true)).expect("desired");
        let mut current = desired.clone();
        current.metadata.resource_version = Some("42".to_string());
        assert!(!should_update(&current, &desired));

        current.spec.jwt_rules.pop();
        assert!(should_update(&current, &desired));
        update_fields(&mut current, &desired);
        assert_eq!(current.spec, desired.spec);
        assert_eq!(current.metadata.resource_version.as_deref(), Some("42"));
    }
}
