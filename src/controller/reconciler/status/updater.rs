//! # Status Updater
//!
//! Persists the status computed for one pass. Writes are skipped when the
//! status is unchanged, so a steady-state pass produces no write and no
//! events. Conflicts are retried with exponential backoff; every attempt
//! re-reads the policy and rebuilds the status against the latest stored
//! conditions.

use super::conditions::build_conditions;
use super::state::{determine_state, status_message, Expected};
use super::StatusError;
use crate::controller::reconciler::events::{reasons, RECONCILE_ACTION};
use crate::controller::reconciler::scope::Scope;
use crate::controller::reconciler::store::ObjectStore;
use crate::controller::reconciler::types::Reconciler;
use crate::crd::{AuthPolicy, AuthPolicyStatus, Condition, Phase};
use crate::observability::PolicyInfo;
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, info, warn};

/// What happened to the status of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Unchanged,
    Updated,
    /// The policy was deleted before the status could be written
    Gone,
}

/// Status for `scope`, reusing timestamps from `existing` conditions.
#[must_use]
pub fn build_status(
    scope: &Scope,
    phase: Phase,
    expected: &[Expected],
    existing: &[Condition],
    now: &str,
) -> AuthPolicyStatus {
    AuthPolicyStatus {
        observed_generation: scope.policy.metadata.generation,
        phase: Some(phase),
        message: Some(status_message(scope, phase)),
        ready: phase == Phase::Ready,
        conditions: build_conditions(scope, phase, expected, existing, now),
    }
}

/// `scheme://host` of the discovery URI, for the info metric
fn issuer_label(well_known_uri: &str) -> String {
    reqwest::Url::parse(well_known_uri)
        .ok()
        .and_then(|url| {
            url.host_str()
                .map(|host| format!("{}://{}", url.scheme(), host))
        })
        .unwrap_or_default()
}

fn policy_info(scope: &Scope, phase: Phase) -> PolicyInfo {
    PolicyInfo {
        name: scope.name().to_string(),
        namespace: scope.namespace().to_string(),
        state: phase.to_string(),
        issuer: issuer_label(&scope.policy.spec.well_known_uri),
        enabled: scope.enabled(),
        auto_login_enabled: scope.policy.auto_login_enabled(),
    }
}

fn existing_conditions(policy: &AuthPolicy) -> &[Condition] {
    policy
        .status
        .as_ref()
        .map_or(&[][..], |s| s.conditions.as_slice())
}

/// Compute and persist the status of `scope`.
pub async fn update_status<S: ObjectStore>(
    ctx: &Reconciler<S>,
    scope: &Scope,
    expected: &[Expected],
) -> Result<StatusOutcome, StatusError> {
    let phase = determine_state(scope, expected);
    ctx.metrics.set_policy_info(&policy_info(scope, phase));

    let now = chrono::Utc::now().to_rfc3339();
    let status = build_status(scope, phase, expected, existing_conditions(&scope.policy), &now);
    if scope.policy.status.as_ref() == Some(&status) {
        debug!(
            "Skipping status update for AuthPolicy {}/{} - status unchanged",
            scope.namespace(),
            scope.name()
        );
        ctx.metrics.record_status_update("skipped");
        return Ok(StatusOutcome::Unchanged);
    }

    let reference = scope.policy.object_ref(&());
    ctx.events
        .publish(
            &reference,
            EventType::Normal,
            reasons::STATUS_UPDATE_STARTED,
            RECONCILE_ACTION,
            Some("Status update of AuthPolicy started.".to_string()),
        )
        .await;

    match write_with_retry(ctx, scope, phase, expected).await {
        Ok(outcome) => {
            info!(
                "✅ Updated status of AuthPolicy {}/{} to {}",
                scope.namespace(),
                scope.name(),
                phase
            );
            ctx.metrics.record_status_update("updated");
            ctx.events
                .publish(
                    &reference,
                    EventType::Normal,
                    reasons::STATUS_UPDATE_SUCCESS,
                    RECONCILE_ACTION,
                    Some("Status update of AuthPolicy updated successfully.".to_string()),
                )
                .await;
            Ok(outcome)
        }
        Err(e) => {
            warn!(
                "⚠️  Failed to update status of AuthPolicy {}/{}: {}",
                scope.namespace(),
                scope.name(),
                e
            );
            ctx.metrics.record_status_update("failed");
            ctx.events
                .publish(
                    &reference,
                    EventType::Warning,
                    reasons::STATUS_UPDATE_FAILED,
                    RECONCILE_ACTION,
                    Some("Status update of AuthPolicy failed.".to_string()),
                )
                .await;
            Err(e)
        }
    }
}

async fn write_with_retry<S: ObjectStore>(
    ctx: &Reconciler<S>,
    scope: &Scope,
    phase: Phase,
    expected: &[Expected],
) -> Result<StatusOutcome, StatusError> {
    let attempts = ctx.config.status_retry_attempts.max(1);
    let mut delay = ctx.config.status_retry_base();

    for attempt in 1..=attempts {
        let Some(latest) = ctx
            .store
            .get::<AuthPolicy>(scope.namespace(), scope.name())
            .await?
        else {
            debug!(
                "AuthPolicy {}/{} is gone, dropping status update",
                scope.namespace(),
                scope.name()
            );
            return Ok(StatusOutcome::Gone);
        };

        let now = chrono::Utc::now().to_rfc3339();
        let status = build_status(scope, phase, expected, existing_conditions(&latest), &now);
        if latest.status.as_ref() == Some(&status) {
            return Ok(StatusOutcome::Unchanged);
        }

        let body = serde_json::to_value(&status).map_err(StatusError::Encode)?;
        match ctx.store.update_status(&latest, &body).await {
            Ok(_) => return Ok(StatusOutcome::Updated),
            Err(e) if e.is_conflict() && attempt < attempts => {
                debug!(
                    "Conflict writing status of AuthPolicy {}/{} (attempt {}/{}), retrying in {:?}",
                    scope.namespace(),
                    scope.name(),
                    attempt,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) if e.is_conflict() => return Err(StatusError::Conflict { attempts }),
            Err(e) => return Err(e.into()),
        }
    }

    Err(StatusError::Conflict { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issuer_label_is_scheme_and_host() {
        assert_eq!(
            issuer_label("https://idp.example.com/realms/shop/.well-known/openid-configuration"),
            "https://idp.example.com"
        );
        assert_eq!(issuer_label("not a url"), "");
    }
}
