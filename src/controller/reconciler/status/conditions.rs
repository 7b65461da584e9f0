//! # Conditions
//!
//! Order: the summary condition `AuthPolicy-<name>`, one condition per
//! recorded descendant in record order, then one `NotFound` condition for
//! every expected object that recorded nothing.
//!
//! A condition whose type, status, reason and message match an existing one
//! keeps the existing `lastTransitionTime`.

use super::state::Expected;
use crate::controller::reconciler::scope::{Descendant, Scope};
use crate::crd::{Condition, Phase};

const TRUE: &str = "True";
const FALSE: &str = "False";
const UNKNOWN: &str = "Unknown";

fn condition(r#type: String, status: &str, reason: &str, message: String) -> Condition {
    Condition {
        r#type,
        status: status.to_string(),
        reason: reason.to_string(),
        message,
        last_transition_time: String::new(),
    }
}

fn summary_condition(scope: &Scope, phase: Phase) -> Condition {
    let r#type = format!("AuthPolicy-{}", scope.name());
    match phase {
        Phase::Invalid => condition(
            r#type,
            FALSE,
            "InvalidConfiguration",
            scope.invalid_reason.clone().unwrap_or_default(),
        ),
        Phase::Pending => condition(
            r#type,
            UNKNOWN,
            "ReconciliationPending",
            "Descendants of AuthPolicy are not yet reconciled.".to_string(),
        ),
        Phase::Failed => condition(
            r#type,
            FALSE,
            "ReconciliationFailed",
            "Descendants of AuthPolicy failed during reconciliation.".to_string(),
        ),
        Phase::Ready => condition(
            r#type,
            TRUE,
            "ReconciliationSuccess",
            "Descendants of AuthPolicy reconciled successfully.".to_string(),
        ),
    }
}

fn descendant_condition(descendant: &Descendant) -> Condition {
    match (&descendant.error_message, &descendant.success_message) {
        (Some(error), _) => condition(descendant.id.clone(), FALSE, "Error", error.clone()),
        (None, Some(success)) => condition(descendant.id.clone(), TRUE, "Success", success.clone()),
        (None, None) => condition(
            descendant.id.clone(),
            UNKNOWN,
            UNKNOWN,
            "No status message set".to_string(),
        ),
    }
}

fn missing_condition(expected: &Expected) -> Condition {
    condition(
        Descendant::id_for(&expected.kind, &expected.name),
        FALSE,
        "NotFound",
        format!(
            "Expected resource {} of kind {} was not created",
            expected.name, expected.kind
        ),
    )
}

/// Build the full condition list, stamping changed conditions with `now`.
#[must_use]
pub fn build_conditions(
    scope: &Scope,
    phase: Phase,
    expected: &[Expected],
    existing: &[Condition],
    now: &str,
) -> Vec<Condition> {
    let mut conditions = vec![summary_condition(scope, phase)];
    conditions.extend(scope.descendants.iter().map(descendant_condition));
    conditions.extend(
        expected
            .iter()
            .filter(|e| {
                scope
                    .descendants
                    .get(&Descendant::id_for(&e.kind, &e.name))
                    .is_none()
            })
            .map(missing_condition),
    );

    for condition in &mut conditions {
        condition.last_transition_time = existing
            .iter()
            .find(|old| old.same_content(condition))
            .map_or_else(|| now.to_string(), |old| old.last_transition_time.clone());
    }
    conditions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::testing::{policy, scope, MINIMAL_SPEC};

    const EARLIER: &str = "2026-01-01T00:00:00+00:00";
    const LATER: &str = "2026-01-01T00:05:00+00:00";

    fn ready_scope() -> (Scope, Vec<Expected>) {
        let mut scope = scope(policy(MINIMAL_SPEC));
        scope
            .descendants
            .record(Descendant::success("RequestAuthentication", "orders", "created"));
        scope.descendants.record(Descendant::success(
            "AuthorizationPolicy",
            "orders-require-auth",
            "created",
        ));
        let expected = vec![
            Expected::new("RequestAuthentication", "orders"),
            Expected::new("AuthorizationPolicy", "orders-require-auth"),
        ];
        (scope, expected)
    }

    #[test]
    fn test_condition_order_and_content() {
        let (mut scope, mut expected) = ready_scope();
        expected.push(Expected::new("EnvoyFilter", "orders-login"));
        scope
            .descendants
            .record(Descendant::error("RequestAuthentication", "orders", "Unable to get"));

        let conditions = build_conditions(&scope, Phase::Pending, &expected, &[], EARLIER);
        let types: Vec<&str> = conditions.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "AuthPolicy-orders",
                "RequestAuthentication-orders",
                "AuthorizationPolicy-orders-require-auth",
                "EnvoyFilter-orders-login",
            ]
        );
        assert_eq!(conditions[0].status, "Unknown");
        assert_eq!(conditions[1].reason, "Error");
        assert_eq!(conditions[2].reason, "Success");
        assert_eq!(conditions[3].reason, "NotFound");
        assert_eq!(
            conditions[3].message,
            "Expected resource orders-login of kind EnvoyFilter was not created"
        );
    }

    #[test]
    fn test_unchanged_conditions_keep_timestamps() {
        let (scope, expected) = ready_scope();
        let first = build_conditions(&scope, Phase::Ready, &expected, &[], EARLIER);
        let second = build_conditions(&scope, Phase::Ready, &expected, &first, LATER);
        assert_eq!(first, second);
    }

    #[test]
    fn test_only_changed_condition_is_restamped() {
        let (mut scope, expected) = ready_scope();
        let first = build_conditions(&scope, Phase::Ready, &expected, &[], EARLIER);

        scope.descendants.record(Descendant::success(
            "AuthorizationPolicy",
            "orders-require-auth",
            "updated",
        ));
        let second = build_conditions(&scope, Phase::Ready, &expected, &first, LATER);

        assert_eq!(second[0].last_transition_time, EARLIER);
        assert_eq!(second[1].last_transition_time, EARLIER);
        assert_eq!(second[2].last_transition_time, LATER);
    }

    #[test]
    fn test_invalid_condition_carries_reason() {
        let scope = Scope::invalid(policy(MINIMAL_SPEC), "selector must not be empty");
        let conditions = build_conditions(&scope, Phase::Invalid, &[], &[], EARLIER);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].reason, "InvalidConfiguration");
        assert_eq!(conditions[0].message, "selector must not be empty");
    }
}
