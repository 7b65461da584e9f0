//! # AuthPolicy Status
//!
//! Status types for reporting aggregated readiness of the generated objects.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of the AuthPolicy resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Overall state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Human-readable description of the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub ready: bool,
    /// One summary condition followed by one condition per generated object
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Reconciliation state of an AuthPolicy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    Invalid,
    Pending,
    Failed,
    Ready,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Invalid => "Invalid",
            Phase::Pending => "Pending",
            Phase::Failed => "Failed",
            Phase::Ready => "Ready",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition for status
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub r#type: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
    pub reason: String,
    pub message: String,
    /// RFC3339 timestamp of the last content change
    pub last_transition_time: String,
}

impl Condition {
    /// Same content, ignoring the timestamp
    #[must_use]
    pub fn same_content(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}
