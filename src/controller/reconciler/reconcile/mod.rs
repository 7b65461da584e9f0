//! # Reconciliation Logic
//!
//! One pass over one AuthPolicy:
//!
//! 1. Re-read the policy; a deleted policy only drops its metrics
//! 2. Resolve discovery documents, audiences, credentials and pod mounts
//!    into a [`Scope`](crate::controller::reconciler::scope::Scope)
//! 3. Build the six reconcile actions
//! 4. Run every action, even after one fails
//! 5. Persist the status
//!
//! Errors from step 4 are already visible in the status; they are also
//! returned so the error policy retries the policy with backoff.

use crate::controller::reconciler::actions::build_actions;
use crate::controller::reconciler::resolve::build_scope;
use crate::controller::reconciler::scope::{Descendant, Scope};
use crate::controller::reconciler::status::{determine_state, update_status, Expected};
use crate::controller::reconciler::store::ObjectStore;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::resources::ResourceError;
use crate::crd::{AuthPolicy, Phase};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Main reconciliation function; errors are handled by the error policy.
pub async fn reconcile<S: ObjectStore + 'static>(
    policy: Arc<AuthPolicy>,
    ctx: Arc<Reconciler<S>>,
) -> Result<Action, ReconcilerError> {
    let name = policy.name_any();
    let namespace = policy.namespace().unwrap_or_else(|| "default".to_string());
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.kind = "AuthPolicy"
    );
    reconcile_policy(&name, &namespace, &ctx).instrument(span).await
}

async fn reconcile_policy<S: ObjectStore + 'static>(
    name: &str,
    namespace: &str,
    ctx: &Reconciler<S>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    ctx.metrics.increment_reconciliations();
    let resource_key = format!("{namespace}/{name}");
    info!("🔄 Reconciling AuthPolicy {}", resource_key);

    let Some(latest) = ctx.store.get::<AuthPolicy>(namespace, name).await? else {
        info!("AuthPolicy {} is gone, dropping its metrics", resource_key);
        ctx.metrics.forget_policy(namespace, name);
        ctx.forget_backoff(&resource_key);
        return Ok(Action::await_change());
    };

    if latest.metadata.deletion_timestamp.is_some() {
        debug!(
            "AuthPolicy {} is being deleted, generated objects are garbage collected",
            resource_key
        );
        return Ok(Action::await_change());
    }

    let mut scope = build_scope(&ctx.store, ctx.discovery.as_ref(), latest).await;

    let actions = match build_actions::<S>(&scope) {
        Ok(actions) => actions,
        Err(error) => {
            warn!(
                "⚠️  AuthPolicy {} could not render its objects: {}",
                resource_key, error
            );
            let expected = record_render_failure(&mut scope, &error);
            update_status(ctx, &scope, &expected).await?;
            return Err(ReconcilerError::Render(error));
        }
    };
    let expected: Vec<Expected> = actions
        .iter()
        .filter(|action| action.is_desired())
        .map(|action| Expected::new(action.kind(), action.name()))
        .collect();

    for action in &actions {
        action.reconcile(&ctx.store, &mut scope).await;
    }

    for descendant in scope.descendants.iter() {
        let outcome = if descendant.error_message.is_some() {
            "error"
        } else {
            "success"
        };
        ctx.metrics.record_descendant_outcome(&descendant.kind, outcome);
    }

    update_status(ctx, &scope, &expected).await?;

    let phase = determine_state(&scope, &expected);
    ctx.metrics
        .observe_reconciliation_duration(start.elapsed().as_secs_f64());

    let failed = scope
        .descendants
        .iter()
        .filter(|d| d.error_message.is_some())
        .count();
    if failed > 0 {
        warn!(
            "⚠️  AuthPolicy {} reconciled with {} failed object(s)",
            resource_key, failed
        );
        return Err(ReconcilerError::DescendantsFailed { failed });
    }

    ctx.reset_backoff(&resource_key);
    match phase {
        // A deletion this pass; the next pass confirms the object is gone.
        Phase::Pending => Ok(Action::requeue(Duration::from_secs(
            ctx.config.backoff_min_secs,
        ))),
        Phase::Invalid => {
            info!(
                "AuthPolicy {} is invalid, waiting for a change or the next resync",
                resource_key
            );
            Ok(Action::requeue(ctx.config.resync_interval()))
        }
        Phase::Failed | Phase::Ready => {
            info!(
                "✅ AuthPolicy {} reconciled in {:.3}s ({})",
                resource_key,
                start.elapsed().as_secs_f64(),
                phase
            );
            Ok(Action::requeue(ctx.config.resync_interval()))
        }
    }
}

/// Record a render failure on the object it concerns, so the policy is
/// reported Failed with the error message. Returns the expected objects.
fn record_render_failure(scope: &mut Scope, error: &ResourceError) -> Vec<Expected> {
    let (kind, name) = error.object(scope.name());
    scope
        .descendants
        .record(Descendant::error(kind, &name, error.to_string()));
    vec![Expected::new(kind, name)]
}
