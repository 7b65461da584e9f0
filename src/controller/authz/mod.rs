//! # Authorization Rule Compiler
//!
//! Turns the resolved rules of a policy into three independent rule sets:
//!
//! - **deny**: fail-closed deny-all for invalid policies, negated claim checks otherwise
//! - **ignore**: unauthenticated access to explicitly ignored paths
//! - **require**: token-required access, per rule and for the residual surface
//!
//! Precedence is fixed: deny always wins, an ignore rule bypasses
//! authentication unless a require rule claims the same path and method, and
//! everything else requires a valid token from the configured issuer.
//!
//! Pure and synchronous. Resolution failures never reach this module; it
//! only sees the validity flag.

pub mod closure;
pub mod conditions;
pub mod deny;
pub mod ignore;
pub mod matchers;
pub mod require;

use crate::controller::resources::istio::Rule;
use crate::crd::{ClaimCondition, RequestAuthRule, RequestMatcher};

/// Resolved rules for one trusted issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerPolicy {
    pub issuer: String,
    /// Audiences accepted in the `aud` claim
    pub accepted_resources: Vec<String>,
    pub auth_rules: Vec<RequestAuthRule>,
    pub ignore_rules: Vec<RequestMatcher>,
}

/// Everything the compiler needs from a resolved policy.
#[derive(Debug, Clone, Copy)]
pub struct PolicyFacts<'a> {
    pub enabled: bool,
    pub valid: bool,
    pub issuers: &'a [IssuerPolicy],
    pub baseline_claims: &'a [ClaimCondition],
}

impl PolicyFacts<'_> {
    /// Disabled or failed validation
    #[must_use]
    pub fn misconfigured(&self) -> bool {
        !self.enabled || !self.valid
    }
}

/// Compiled rule sets; `None` means the corresponding policy is not desired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSets {
    pub deny: Option<Vec<Rule>>,
    pub ignore: Option<Vec<Rule>>,
    pub require: Option<Vec<Rule>>,
}

/// Compile all three rule sets.
#[must_use]
pub fn compile_rule_sets(facts: &PolicyFacts<'_>) -> RuleSets {
    let matchers = closure::issuer_matchers(facts.issuers);
    RuleSets {
        deny: deny::deny_rules(facts),
        ignore: ignore::ignore_rules(facts, &matchers),
        require: require::require_rules(facts, &matchers),
    }
}
