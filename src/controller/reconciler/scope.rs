//! # Scope
//!
//! Per-pass working state: the policy snapshot, the facts resolved for it,
//! the validity flag and the outcome ledger of every generated object.
//! A scope is owned by exactly one reconcile pass.

use crate::controller::authz::{IssuerPolicy, PolicyFacts};
use crate::crd::AuthPolicy;
use std::collections::{BTreeMap, HashMap};

/// JWT validation source for one issuer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtSource {
    pub issuer: String,
    pub jwks_uri: String,
    /// Resolved `allowedAudiences`
    pub audiences: Vec<String>,
}

/// Auto-login settings with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoLoginConfig {
    pub login_path: Option<String>,
    pub redirect_path: String,
    pub logout_path: String,
    pub post_logout_redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub login_params: BTreeMap<String, String>,
}

/// OAuth2 client credentials
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// Everything the login filter needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFlow {
    pub config: AutoLoginConfig,
    pub client: OAuthClient,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
    pub end_session_endpoint: String,
}

/// Facts resolved from the spec and its references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    /// Primary issuer first, then additional issuers in declaration order
    pub issuers: Vec<IssuerPolicy>,
    pub jwt_sources: Vec<JwtSource>,
    pub login: Option<LoginFlow>,
}

/// Last-known outcome of one generated object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descendant {
    /// `<kind>-<name>`
    pub id: String,
    pub kind: String,
    pub name: String,
    pub error_message: Option<String>,
    pub success_message: Option<String>,
}

impl Descendant {
    #[must_use]
    pub fn id_for(kind: &str, name: &str) -> String {
        format!("{kind}-{name}")
    }

    #[must_use]
    pub fn success(kind: &str, name: &str, message: impl Into<String>) -> Self {
        Self {
            id: Self::id_for(kind, name),
            kind: kind.to_string(),
            name: name.to_string(),
            error_message: None,
            success_message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn error(kind: &str, name: &str, message: impl Into<String>) -> Self {
        Self {
            id: Self::id_for(kind, name),
            kind: kind.to_string(),
            name: name.to_string(),
            error_message: Some(message.into()),
            success_message: None,
        }
    }
}

/// Descendants keyed by id, iterated in first-insertion order.
#[derive(Debug, Clone, Default)]
pub struct Descendants {
    entries: Vec<Descendant>,
    index: HashMap<String, usize>,
}

impl Descendants {
    /// Insert, or replace the entry with the same id in place.
    pub fn record(&mut self, descendant: Descendant) {
        match self.index.get(&descendant.id) {
            Some(&position) => self.entries[position] = descendant,
            None => {
                self.index.insert(descendant.id.clone(), self.entries.len());
                self.entries.push(descendant);
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Descendant> {
        self.index.get(id).map(|&position| &self.entries[position])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descendant> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.error_message.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub policy: AuthPolicy,
    /// Present when resolution and validation succeeded
    pub resolved: Option<ResolvedPolicy>,
    /// Why the policy is invalid, if it is
    pub invalid_reason: Option<String>,
    pub descendants: Descendants,
}

impl Scope {
    #[must_use]
    pub fn valid(policy: AuthPolicy, resolved: ResolvedPolicy) -> Self {
        Self {
            policy,
            resolved: Some(resolved),
            invalid_reason: None,
            descendants: Descendants::default(),
        }
    }

    #[must_use]
    pub fn invalid(policy: AuthPolicy, reason: impl Into<String>) -> Self {
        Self {
            policy,
            resolved: None,
            invalid_reason: Some(reason.into()),
            descendants: Descendants::default(),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.invalid_reason.is_none()
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.policy.spec.enabled
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.policy.metadata.name.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.policy.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Input for the authorization rule compiler
    #[must_use]
    pub fn policy_facts(&self) -> PolicyFacts<'_> {
        PolicyFacts {
            enabled: self.enabled(),
            valid: self.is_valid(),
            issuers: self.resolved.as_ref().map_or(&[], |r| r.issuers.as_slice()),
            baseline_claims: self
                .policy
                .spec
                .baseline_auth
                .as_ref()
                .map_or(&[], |b| b.claims.as_slice()),
        }
    }

    /// Login flow when the policy is enabled, valid and auto-login is on
    #[must_use]
    pub fn login(&self) -> Option<&LoginFlow> {
        if !self.enabled() {
            return None;
        }
        self.resolved.as_ref().and_then(|r| r.login.as_ref())
    }

    /// Issuer of the primary JWT rule, for reporting
    #[must_use]
    pub fn primary_issuer(&self) -> Option<&str> {
        self.resolved
            .as_ref()
            .and_then(|r| r.jwt_sources.first())
            .map(|s| s.issuer.as_str())
    }
}
