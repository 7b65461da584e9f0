//! Ignore (bypass) rule set.
//!
//! Explicit ignore matchers become a single unconditioned ALLOW rule. A path
//! and method also claimed by a require rule is carved out, since a bypass
//! there would defeat the require rule.

use super::closure::IssuerMatchers;
use super::matchers::{merge_into, MethodSet, PathMap};
use super::PolicyFacts;
use crate::controller::paths::rewrite_for_downstream;
use crate::controller::resources::istio::{Operation, Rule, RuleTo};

#[must_use]
pub fn ignore_rules(facts: &PolicyFacts<'_>, matchers: &[IssuerMatchers]) -> Option<Vec<Rule>> {
    if facts.misconfigured() {
        return None;
    }

    let mut required = PathMap::new();
    for set in matchers {
        for (path, methods) in &set.require {
            merge_into(&mut required, path, methods);
        }
    }

    let mut to = Vec::new();
    for matcher in facts.issuers.iter().flat_map(|i| &i.ignore_rules) {
        let methods = MethodSet::of(&matcher.methods);
        let mut unclaimed = Vec::new();

        for path in &matcher.paths {
            match required.get(path) {
                Some(claimed) if methods.overlaps(claimed) => {
                    let remaining = methods.minus(claimed);
                    if !remaining.is_empty() {
                        to.push(RuleTo::operation(Operation {
                            paths: vec![rewrite_for_downstream(path)],
                            methods: remaining.iter().map(|m| m.as_str().to_string()).collect(),
                            ..Operation::default()
                        }));
                    }
                }
                _ => unclaimed.push(rewrite_for_downstream(path)),
            }
        }

        if !unclaimed.is_empty() {
            to.push(RuleTo::operation(Operation {
                paths: unclaimed,
                methods: methods.names(),
                ..Operation::default()
            }));
        }
    }

    if to.is_empty() {
        return None;
    }
    Some(vec![Rule {
        to,
        when: Vec::new(),
    }])
}
