//! Deny rule set.
//!
//! DENY rules always win. An invalid policy collapses to a single deny-all
//! rule. Otherwise every require rule that carries claim conditions yields,
//! per path and method, one deny rule for each negated base condition and
//! each negated claim condition.

use super::conditions::{base_deny_conditions, claim_conditions, Polarity};
use super::matchers::MethodSet;
use super::PolicyFacts;
use crate::controller::paths::{compile_to_regex, rewrite_for_downstream};
use crate::controller::resources::istio::{Operation, Rule, RuleTo};
use crate::crd::{ClaimCondition, HttpMethod};

/// One (path, method) pair of a require rule
#[derive(Debug, Clone)]
struct Flattened<'a> {
    path: &'a str,
    method: HttpMethod,
    when: &'a [ClaimCondition],
}

/// The catch-all rule emitted for invalid policies
#[must_use]
pub fn deny_all() -> Rule {
    Rule {
        to: vec![RuleTo::operation(Operation {
            paths: vec!["*".to_string()],
            ..Operation::default()
        })],
        when: Vec::new(),
    }
}

/// Deny rules, or `None` when no deny policy is desired.
#[must_use]
pub fn deny_rules(facts: &PolicyFacts<'_>) -> Option<Vec<Rule>> {
    if !facts.enabled {
        return None;
    }
    if !facts.valid {
        return Some(vec![deny_all()]);
    }

    let flattened = flatten(facts);
    let base = base_deny_conditions(facts.issuers, facts.baseline_claims);
    let mut rules = Vec::new();

    for rule in flattened.iter().filter(|r| !r.when.is_empty()) {
        let operation = Operation {
            paths: vec![rewrite_for_downstream(rule.path)],
            methods: vec![rule.method.as_str().to_string()],
            not_paths: more_specific_siblings(rule, &flattened),
            not_methods: Vec::new(),
        };

        for condition in base
            .iter()
            .cloned()
            .chain(claim_conditions(rule.when, Polarity::Deny))
        {
            rules.push(Rule {
                to: vec![RuleTo::operation(operation.clone())],
                when: vec![condition],
            });
        }
    }

    (!rules.is_empty()).then_some(rules)
}

fn flatten<'a>(facts: &PolicyFacts<'a>) -> Vec<Flattened<'a>> {
    let mut flattened = Vec::new();
    for issuer in facts.issuers {
        for rule in &issuer.auth_rules {
            for method in MethodSet::of(&rule.matcher.methods).expanded() {
                for path in &rule.matcher.paths {
                    flattened.push(Flattened {
                        path,
                        method,
                        when: &rule.when,
                    });
                }
            }
        }
    }
    flattened
}

/// Paths of same-method rules that `rule`'s pattern covers but that do not
/// cover it back. Those rules carry their own conditions and must not be
/// shadowed by this one.
fn more_specific_siblings(rule: &Flattened<'_>, all: &[Flattened<'_>]) -> Vec<String> {
    let Ok(this) = regex::Regex::new(&compile_to_regex(rule.path)) else {
        return Vec::new();
    };

    let mut not_paths: Vec<String> = Vec::new();
    for other in all {
        if other.method != rule.method || other.path == rule.path {
            continue;
        }
        let covers_other = this.is_match(other.path);
        let covered_by_other = regex::Regex::new(&compile_to_regex(other.path))
            .is_ok_and(|re| re.is_match(rule.path));
        let rewritten = rewrite_for_downstream(other.path);
        if covers_other && !covered_by_other && !not_paths.contains(&rewritten) {
            not_paths.push(rewritten);
        }
    }
    not_paths
}
