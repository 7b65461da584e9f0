//! # Watch Loop
//!
//! Watches `AuthPolicy` resources, the objects they own and the pods they
//! select, and triggers reconciliation when any of them changes. The stream
//! is restarted after errors and when it ends, until a shutdown signal
//! arrives.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::resources::istio::{AuthorizationPolicy, EnvoyFilter, RequestAuthentication};
use crate::controller::server::ServerState;
use crate::crd::AuthPolicy;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::Api;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

fn owned_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Auto-login policies whose selector matches `pod`. Their sidecar mount
/// check depends on the pod, so a pod change re-triggers them.
pub fn policies_for_pod<'a>(
    pod: &Pod,
    policies: impl IntoIterator<Item = &'a AuthPolicy>,
) -> Vec<ObjectRef<AuthPolicy>> {
    let namespace = pod.namespace();
    let labels = pod.labels();
    policies
        .into_iter()
        .filter(|policy| policy.namespace() == namespace && policy.auto_login_enabled())
        .filter(|policy| {
            let selector = &policy.spec.selector.match_labels;
            !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
        })
        .map(ObjectRef::from_obj)
        .collect()
}

/// Run the controller watch loop until shutdown
pub async fn run_watch_loop(
    client: Client,
    policies: Api<AuthPolicy>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let config = reconciler.config.clone();
    let namespace = config.watch_namespace.as_deref();
    let concurrency = u16::try_from(config.max_concurrent_reconciliations).unwrap_or(u16::MAX);

    let backoff_duration_ms = Arc::new(AtomicU64::new(config.watch_backoff_start_ms));

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to listen for shutdown signal");
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = Arc::clone(&backoff_duration_ms);
        let backoff_start_ms = config.watch_backoff_start_ms;
        let backoff_max_ms = config.watch_backoff_max_ms;
        let watch_restart_delay = config.watch_restart_delay();
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        let controller = Controller::new(
            policies.clone(),
            watcher::Config::default().any_semantic(),
        );
        let policy_cache = controller.store();
        let controller_future = controller
            .watches(
                owned_api::<Pod>(&client, namespace),
                watcher::Config::default(),
                move |pod| {
                    let cached = policy_cache.state();
                    policies_for_pod(&pod, cached.iter().map(|policy| &**policy))
                },
            )
            .owns(owned_api::<Secret>(&client, namespace), watcher::Config::default())
            .owns(owned_api::<EnvoyFilter>(&client, namespace), watcher::Config::default())
            .owns(
                owned_api::<RequestAuthentication>(&client, namespace),
                watcher::Config::default(),
            )
            .owns(
                owned_api::<AuthorizationPolicy>(&client, namespace),
                watcher::Config::default(),
            )
            .with_config(controller::Config::default().concurrency(concurrency))
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                async move {
                    match &x {
                        Ok(_) => {
                            backoff.store(backoff_start_ms, Ordering::Relaxed);
                            debug!("watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                backoff_max_ms,
                                watch_restart_delay,
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()));

        info!("Starting controller watch loop...");
        controller_future.instrument(watch_span).await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_after_end();
        warn!(
            "Controller stream ended unexpectedly, restarting watch in {}s...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    reconciler.metrics.shutdown();
    info!("Controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::AuthPolicySpec;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn policy(name: &str, namespace: &str, auto_login: bool) -> AuthPolicy {
        let spec: AuthPolicySpec = serde_yaml::from_str(&format!(
            "wellKnownURI: https://idp/.well-known/openid-configuration\nselector:\n  matchLabels:\n    app: orders\nautoLogin:\n  enabled: {auto_login}\n"
        ))
        .expect("spec");
        let mut policy = AuthPolicy::new(name, spec);
        policy.metadata.namespace = Some(namespace.to_string());
        policy
    }

    fn pod(labels: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("orders-1".to_string()),
                namespace: Some("shop".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    #[test]
    fn test_pod_triggers_matching_login_policies_only() {
        let policies = [
            policy("orders", "shop", true),
            policy("no-login", "shop", false),
            policy("elsewhere", "other", true),
        ];

        let refs = policies_for_pod(
            &pod(&[("app", "orders"), ("pod-template-hash", "x")]),
            &policies,
        );
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "orders");

        assert!(policies_for_pod(&pod(&[("app", "billing")]), &policies).is_empty());
    }
}
