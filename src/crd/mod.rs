//! # Custom Resource Definitions
//!
//! CRD types for the AuthPolicy controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - AuthPolicy specification and nested rule types
//! - `status.rs` - Status types for reporting readiness and conditions

mod spec;
mod status;

pub use spec::{
    default_true, AllowedAudience, AuthPolicy, AuthPolicySpec, AutoLogin, BaselineAuth,
    ClaimCondition, ClaimToHeader, HttpMethod, IssuerRules, KeyRef, OAuthCredentials,
    RequestAuthRule, RequestMatcher, ValueSource, WorkloadSelector,
};
pub use status::{AuthPolicyStatus, Condition, Phase};
