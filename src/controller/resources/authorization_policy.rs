//! AuthorizationPolicies for the deny, ignore and require rule sets.

use super::istio::{AuthorizationAction, AuthorizationPolicy, AuthorizationPolicySpec};
use super::{
    deny_policy_name, ignore_policy_name, object_meta, require_policy_name, workload_selector,
};
use crate::controller::authz::RuleSets;
use crate::controller::reconciler::scope::Scope;

/// Which of the three generated policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Deny,
    Ignore,
    Require,
}

impl PolicyKind {
    #[must_use]
    pub fn object_name(self, policy: &str) -> String {
        match self {
            PolicyKind::Deny => deny_policy_name(policy),
            PolicyKind::Ignore => ignore_policy_name(policy),
            PolicyKind::Require => require_policy_name(policy),
        }
    }

    #[must_use]
    pub fn action(self) -> AuthorizationAction {
        match self {
            PolicyKind::Deny => AuthorizationAction::Deny,
            PolicyKind::Ignore | PolicyKind::Require => AuthorizationAction::Allow,
        }
    }
}

/// Desired policy of `kind`, or `None` when its rule set is not desired.
#[must_use]
pub fn desired(scope: &Scope, kind: PolicyKind, rule_sets: &RuleSets) -> Option<AuthorizationPolicy> {
    let rules = match kind {
        PolicyKind::Deny => rule_sets.deny.as_ref(),
        PolicyKind::Ignore => rule_sets.ignore.as_ref(),
        PolicyKind::Require => rule_sets.require.as_ref(),
    }?;

    Some(AuthorizationPolicy {
        metadata: object_meta(scope, &kind.object_name(scope.name())),
        spec: AuthorizationPolicySpec {
            selector: Some(workload_selector(scope)),
            action: Some(kind.action()),
            rules: rules.clone(),
        },
    })
}

#[must_use]
pub fn should_update(current: &AuthorizationPolicy, desired: &AuthorizationPolicy) -> bool {
    current.spec.selector != desired.spec.selector
        || current.spec.action != desired.spec.action
        || current.spec.rules != desired.spec.rules
}

pub fn update_fields(current: &mut AuthorizationPolicy, desired: &AuthorizationPolicy) {
    current.spec.selector.clone_from(&desired.spec.selector);
    current.spec.action = desired.spec.action;
    current.spec.rules.clone_from(&desired.spec.rules);
}
