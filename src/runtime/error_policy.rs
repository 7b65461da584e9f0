//! # Error Policy
//!
//! Requeue decisions for failed passes and classification of watch stream
//! errors.

use crate::controller::reconciler::store::ObjectStore;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::AuthPolicy;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback delay when the backoff table cannot be locked (seconds)
const FALLBACK_BACKOFF_SECS: u64 = 60;

/// Requeue a failed policy with per-resource Fibonacci backoff.
pub fn handle_reconciliation_error<S: ObjectStore>(
    obj: Arc<AuthPolicy>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler<S>>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    ctx.metrics.increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let (backoff_seconds, error_count) = ctx.next_backoff(&resource_key).unwrap_or_else(|| {
        warn!(
            "Failed to lock backoff states, using default backoff of {}s",
            FALLBACK_BACKOFF_SECS
        );
        (FALLBACK_BACKOFF_SECS, 0)
    });

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {})",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// How a watch stream error is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    TooManyRequests,
    NotFound,
    Other,
}

/// Classify a watch error by its rendered message.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    // 404s rendered as plain text also mention WatchFailed, so check them first.
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::TooManyRequests
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Handle a watch stream error.
///
/// Returns `None` to drop the error and let the stream restart, or `Some(())`
/// to keep it.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );

    let kind = classify_watch_error(error_string);
    match kind {
        WatchErrorKind::Unauthorized => {
            error_span.in_scope(|| {
                error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
                error!("   Verify the ClusterRole and ClusterRoleBinding of the controller ServiceAccount still grant list/watch on authpolicies");
                warn!(
                    "⏳ Waiting {}s before retrying watch...",
                    watch_restart_delay.as_secs()
                );
            });
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            error_span.in_scope(|| {
                warn!("Watch resource version expired (410) - this is normal during pod restarts, watch will restart");
            });
            None
        }
        WatchErrorKind::TooManyRequests => {
            let current = backoff.load(Ordering::Relaxed);
            error_span.in_scope(|| {
                warn!(
                    "API server storage reinitializing (429), backing off for {}ms before restart...",
                    current
                );
            });
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            error_span.in_scope(|| {
                warn!(
                    "Resource not found (404) - this may be normal if a resource was deleted or a CRD is missing. Error: {}",
                    error_string
                );
            });
            Some(())
        }
        WatchErrorKind::Other => {
            error_span.in_scope(|| error!("Controller stream error: {}", error_string));
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}
