//! Require (allow) rule set.
//!
//! With no explicit rules the whole surface requires a valid token. Otherwise
//! each require rule gets an allow rule carrying its claim conditions, and a
//! residual rule covers everything no rule mentions.

use super::closure::IssuerMatchers;
use super::conditions::{base_allow_conditions, claim_conditions, Polarity};
use super::PolicyFacts;
use crate::controller::paths::rewrite_for_downstream;
use crate::controller::resources::istio::{Operation, Rule, RuleCondition, RuleTo};

#[must_use]
pub fn require_rules(facts: &PolicyFacts<'_>, matchers: &[IssuerMatchers]) -> Option<Vec<Rule>> {
    if facts.misconfigured() {
        return None;
    }

    let mut rules = Vec::new();
    for (issuer, set) in facts.issuers.iter().zip(matchers) {
        let base = base_allow_conditions(issuer, facts.baseline_claims);

        if set.is_empty() {
            rules.push(Rule {
                to: vec![RuleTo::operation(Operation {
                    paths: vec!["*".to_string()],
                    ..Operation::default()
                })],
                when: base,
            });
            continue;
        }

        rules.push(residual_rule(set, base.clone()));

        for auth_rule in &issuer.auth_rules {
            let mut when = base.clone();
            when.extend(claim_conditions(&auth_rule.when, Polarity::Allow));
            rules.push(Rule {
                to: vec![RuleTo::operation(Operation {
                    paths: auth_rule
                        .matcher
                        .paths
                        .iter()
                        .map(|p| rewrite_for_downstream(p))
                        .collect(),
                    methods: auth_rule
                        .matcher
                        .method_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    ..Operation::default()
                })],
                when,
            });
        }
    }
    Some(rules)
}

/// Everything not mentioned by a require, ignore or inherited path.
///
/// Paths named with a subset of methods stay reachable for the remaining
/// methods through a `notMethods` entry.
fn residual_rule(set: &IssuerMatchers, base: Vec<RuleCondition>) -> Rule {
    let mentioned = set.mentioned();
    let mut to = Vec::new();

    for (path, methods) in &mentioned {
        if methods.is_any() {
            continue;
        }
        to.push(RuleTo::operation(Operation {
            paths: vec![rewrite_for_downstream(path)],
            not_methods: methods.names(),
            ..Operation::default()
        }));
    }

    to.push(RuleTo::operation(Operation {
        paths: vec!["*".to_string()],
        not_paths: mentioned.keys().map(|p| rewrite_for_downstream(p)).collect(),
        ..Operation::default()
    }));

    Rule { to, when: base }
}
