//! # AuthPolicy Controller
//!
//! Kubernetes controller that turns `AuthPolicy` resources into Istio JWT
//! validation, authorization rules and an OAuth2 login filter.
//!
//! Configuration comes from the environment (see [`ControllerConfig`]);
//! command line flags override it.

use anyhow::Result;
use authpolicy_controller::config::ControllerConfig;
use authpolicy_controller::runtime::initialization::initialize;
use authpolicy_controller::runtime::watch_loop::run_watch_loop;
use clap::Parser;

/// AuthPolicy Controller
#[derive(Parser, Debug)]
#[command(name = "authpolicy-controller", version, about, long_about = None)]
struct Args {
    /// Port of the metrics and probe server
    #[arg(long)]
    port: Option<u16>,

    /// Only watch AuthPolicies in this namespace (defaults to all namespaces)
    #[arg(short, long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ControllerConfig::from_env();
    if let Some(port) = args.port {
        config.metrics_port = port;
    }
    if args.namespace.is_some() {
        config.watch_namespace = args.namespace;
    }

    let init = initialize(config).await?;
    run_watch_loop(init.client, init.policies, init.reconciler, init.server_state).await
}
