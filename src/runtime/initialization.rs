//! # Initialization
//!
//! Controller startup: rustls provider, tracing, metrics, the HTTP server,
//! the Kubernetes client and the reconciler context.

use crate::config::ControllerConfig;
use crate::controller::reconciler::events::KubeEventSink;
use crate::controller::reconciler::resolve::HttpDiscoveryResolver;
use crate::controller::reconciler::store::KubeStore;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::AuthPolicy;
use crate::observability::Metrics;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    /// AuthPolicies in the watched namespace, or all namespaces
    pub policies: Api<AuthPolicy>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub metrics: Arc<Metrics>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self.server_state.is_ready.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Install the rustls crypto provider. Safe to call more than once.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

fn init_tracing() {
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authpolicy_controller=info".into()),
        )
        .try_init()
    {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Initialize the controller runtime
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // Must precede any TLS use (kube client, discovery HTTP client).
    install_crypto_provider();
    init_tracing();

    info!("Starting AuthPolicy Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let server_state = Arc::new(ServerState::new(Arc::clone(&metrics)));

    let server_handle = {
        let state = Arc::clone(&server_state);
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle, &config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let policies: Api<AuthPolicy> = match &config.watch_namespace {
        Some(namespace) => {
            info!("Watching AuthPolicies in namespace {}", namespace);
            Api::namespaced(client.clone(), namespace)
        }
        None => Api::all(client.clone()),
    };

    let discovery = HttpDiscoveryResolver::new(
        config.discovery_timeout(),
        config.discovery_cache_ttl(),
    )?;
    let reconciler = Arc::new(Reconciler::new(
        KubeStore::new(client.clone(), config.field_manager.clone()),
        Arc::new(discovery),
        Arc::new(KubeEventSink::new(client.clone(), &config.field_manager)),
        Arc::clone(&metrics),
        config,
    ));

    let startup_span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.existing_resources",
        operation = "log_existing_resources"
    );
    log_existing_resources(&policies)
        .instrument(startup_span)
        .await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        policies,
        reconciler,
        server_state,
        metrics,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = config.server_startup_timeout();
    let poll_interval = config.server_poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Verify the CRD is served and log a startup summary of existing policies.
/// The controller's initial list reconciles every one of them.
async fn log_existing_resources(policies: &Api<AuthPolicy>) {
    let list = match policies.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            warn!(
                "AuthPolicy CRD is not queryable yet ({}); install it with `crdgen | kubectl apply -f -`",
                e
            );
            return;
        }
    };

    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &list.items {
        by_namespace
            .entry(item.namespace().unwrap_or_else(|| "default".to_string()))
            .or_default()
            .push(item.name_any());
    }

    info!("AuthPolicy Controller - Startup Resource Summary");
    info!("Total Resources: {}", list.items.len());
    info!("Namespaces: {}", by_namespace.len());
    for (namespace, mut names) in by_namespace {
        names.sort();
        let shown = if names.len() <= 3 {
            names.join(", ")
        } else {
            format!("{}, ... ({} total)", names[..3].join(", "), names.len())
        };
        info!("Namespace: {}", namespace);
        info!("  Resources ({}): {}", names.len(), shown);
    }
}
