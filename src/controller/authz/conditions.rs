//! Claim conditions attached to authorization rules.

use super::IssuerPolicy;
use crate::controller::resources::istio::RuleCondition;
use crate::crd::ClaimCondition;

/// Allow rules match claim values; deny rules match their complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Allow,
    Deny,
}

#[must_use]
pub fn claim_key(claim: &str) -> String {
    format!("request.auth.claims[{claim}]")
}

fn condition(key: String, values: Vec<String>, polarity: Polarity) -> RuleCondition {
    match polarity {
        Polarity::Allow => RuleCondition {
            key,
            values,
            not_values: Vec::new(),
        },
        Polarity::Deny => RuleCondition {
            key,
            values: Vec::new(),
            not_values: values,
        },
    }
}

/// `iss` condition, plus `aud` when there are accepted resources.
#[must_use]
pub fn issuer_conditions(
    issuers: &[&str],
    accepted_resources: &[String],
    polarity: Polarity,
) -> Vec<RuleCondition> {
    let mut conditions = vec![condition(
        claim_key("iss"),
        issuers.iter().map(|i| (*i).to_string()).collect(),
        polarity,
    )];
    if !accepted_resources.is_empty() {
        conditions.push(condition(
            claim_key("aud"),
            accepted_resources.to_vec(),
            polarity,
        ));
    }
    conditions
}

/// One condition per claim requirement, in declaration order.
#[must_use]
pub fn claim_conditions(claims: &[ClaimCondition], polarity: Polarity) -> Vec<RuleCondition> {
    claims
        .iter()
        .map(|c| condition(claim_key(&c.claim), c.values.clone(), polarity))
        .collect()
}

/// Conditions every authenticated request of `issuer` must meet.
#[must_use]
pub fn base_allow_conditions(
    issuer: &IssuerPolicy,
    baseline: &[ClaimCondition],
) -> Vec<RuleCondition> {
    let mut conditions = issuer_conditions(
        &[issuer.issuer.as_str()],
        &issuer.accepted_resources,
        Polarity::Allow,
    );
    conditions.extend(claim_conditions(baseline, Polarity::Allow));
    conditions
}

/// Negated baseline shared by all deny rules.
///
/// A token from any configured issuer passes the issuer check. The audience
/// check is only emitted when every issuer restricts audiences, otherwise it
/// would reject tokens an unrestricted issuer accepts.
#[must_use]
pub fn base_deny_conditions(
    issuers: &[IssuerPolicy],
    baseline: &[ClaimCondition],
) -> Vec<RuleCondition> {
    let names: Vec<&str> = issuers.iter().map(|i| i.issuer.as_str()).collect();
    let accepted: Vec<String> = if issuers.iter().all(|i| !i.accepted_resources.is_empty()) {
        let mut all = Vec::new();
        for resource in issuers.iter().flat_map(|i| &i.accepted_resources) {
            if !all.contains(resource) {
                all.push(resource.clone());
            }
        }
        all
    } else {
        Vec::new()
    };

    let mut conditions = issuer_conditions(&names, &accepted, Polarity::Deny);
    conditions.extend(claim_conditions(baseline, Polarity::Deny));
    conditions
}
