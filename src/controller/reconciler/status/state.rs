//! Overall state of a policy after one pass.

use crate::controller::reconciler::scope::Scope;
use crate::crd::Phase;

/// A generated object the pass expects to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    pub kind: String,
    pub name: String,
}

impl Expected {
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// First match wins: Invalid, Pending, Failed, Ready.
#[must_use]
pub fn determine_state(scope: &Scope, expected: &[Expected]) -> Phase {
    if !scope.is_valid() {
        Phase::Invalid
    } else if scope.descendants.len() != expected.len() {
        Phase::Pending
    } else if scope.descendants.has_errors() {
        Phase::Failed
    } else {
        Phase::Ready
    }
}

/// Top-level status message for `phase`
#[must_use]
pub fn status_message(scope: &Scope, phase: Phase) -> String {
    match phase {
        Phase::Invalid => scope
            .invalid_reason
            .clone()
            .unwrap_or_else(|| "AuthPolicy is invalid.".to_string()),
        Phase::Pending => "AuthPolicy pending due to missing Descendants.".to_string(),
        Phase::Failed => "AuthPolicy failed.".to_string(),
        Phase::Ready => "AuthPolicy ready.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::scope::Descendant;
    use crate::controller::resources::testing::{policy, scope, MINIMAL_SPEC};

    fn expected() -> Vec<Expected> {
        vec![
            Expected::new("RequestAuthentication", "orders"),
            Expected::new("AuthorizationPolicy", "orders-require-auth"),
        ]
    }

    #[test]
    fn test_invalid_wins_over_everything() {
        let mut scope = Scope::invalid(policy(MINIMAL_SPEC), "bad selector");
        scope
            .descendants
            .record(Descendant::error("AuthorizationPolicy", "orders-deny-auth-rules", "boom"));

        assert_eq!(determine_state(&scope, &expected()), Phase::Invalid);
        assert_eq!(status_message(&scope, Phase::Invalid), "bad selector");
    }

    #[test]
    fn test_missing_descendant_is_pending() {
        let mut scope = scope(policy(MINIMAL_SPEC));
        scope
            .descendants
            .record(Descendant::error("RequestAuthentication", "orders", "boom"));
        assert_eq!(determine_state(&scope, &expected()), Phase::Pending);
    }

    #[test]
    fn test_failed_and_ready() {
        let mut scope = scope(policy(MINIMAL_SPEC));
        scope
            .descendants
            .record(Descendant::success("RequestAuthentication", "orders", "ok"));
        scope.descendants.record(Descendant::success(
            "AuthorizationPolicy",
            "orders-require-auth",
            "ok",
        ));
        assert_eq!(determine_state(&scope, &expected()), Phase::Ready);

        scope.descendants.record(Descendant::error(
            "AuthorizationPolicy",
            "orders-require-auth",
            "Unable to update",
        ));
        assert_eq!(determine_state(&scope, &expected()), Phase::Failed);
        assert_eq!(status_message(&scope, Phase::Failed), "AuthPolicy failed.");
    }
}
