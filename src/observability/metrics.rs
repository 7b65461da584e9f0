//! # Metrics
//!
//! Prometheus metrics for monitoring the controller. All collectors live on
//! a [`Metrics`] value that owns its own [`Registry`]; the runtime builds one
//! at startup and hands it to the reconciler and the HTTP server.
//!
//! ## Metrics Exposed
//!
//! - `authpolicy_reconciliations_total` - Total number of reconcile passes
//! - `authpolicy_reconciliation_errors_total` - Passes that ended in an error
//! - `authpolicy_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `authpolicy_descendant_outcomes_total{kind,outcome}` - Generated object outcomes
//! - `authpolicy_status_updates_total{result}` - Status writes (`updated`, `skipped`, `failed`)
//! - `authpolicy_info{name,namespace,state,issuer,enabled,auto_login_enabled}` - One series per policy

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

const INFO_LABELS: [&str; 6] = [
    "name",
    "namespace",
    "state",
    "issuer",
    "enabled",
    "auto_login_enabled",
];

/// Label values of one `authpolicy_info` series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInfo {
    pub name: String,
    pub namespace: String,
    pub state: String,
    pub issuer: String,
    pub enabled: bool,
    pub auto_login_enabled: bool,
}

impl PolicyInfo {
    fn label_values(&self) -> [String; 6] {
        [
            self.name.clone(),
            self.namespace.clone(),
            self.state.clone(),
            self.issuer.clone(),
            self.enabled.to_string(),
            self.auto_login_enabled.to_string(),
        ]
    }
}

pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounter,
    reconciliation_errors: IntCounter,
    reconciliation_duration: Histogram,
    descendant_outcomes: IntCounterVec,
    status_updates: IntCounterVec,
    policy_info: IntGaugeVec,
    /// Last info labels per `namespace/name`, so a state change replaces the old series
    info_labels: Mutex<HashMap<String, [String; 6]>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create every collector and register it on a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciliations = IntCounter::new(
            "authpolicy_reconciliations_total",
            "Total number of reconcile passes",
        )?;
        let reconciliation_errors = IntCounter::new(
            "authpolicy_reconciliation_errors_total",
            "Total number of reconcile passes that ended in an error",
        )?;
        let reconciliation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "authpolicy_reconciliation_duration_seconds",
                "Duration of reconcile passes in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        )?;
        let descendant_outcomes = IntCounterVec::new(
            Opts::new(
                "authpolicy_descendant_outcomes_total",
                "Outcomes of generated object reconciliation by kind",
            ),
            &["kind", "outcome"],
        )?;
        let status_updates = IntCounterVec::new(
            Opts::new(
                "authpolicy_status_updates_total",
                "AuthPolicy status writes by result",
            ),
            &["result"],
        )?;
        let policy_info = IntGaugeVec::new(
            Opts::new("authpolicy_info", "Information about each AuthPolicy"),
            &INFO_LABELS,
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconciliation_errors.clone()))?;
        registry.register(Box::new(reconciliation_duration.clone()))?;
        registry.register(Box::new(descendant_outcomes.clone()))?;
        registry.register(Box::new(status_updates.clone()))?;
        registry.register(Box::new(policy_info.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconciliation_errors,
            reconciliation_duration,
            descendant_outcomes,
            status_updates,
            policy_info,
            info_labels: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered collector
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn increment_reconciliations(&self) {
        self.reconciliations.inc();
    }

    pub fn increment_reconciliation_errors(&self) {
        self.reconciliation_errors.inc();
    }

    pub fn observe_reconciliation_duration(&self, seconds: f64) {
        self.reconciliation_duration.observe(seconds);
    }

    pub fn record_descendant_outcome(&self, kind: &str, outcome: &str) {
        self.descendant_outcomes
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn record_status_update(&self, result: &str) {
        self.status_updates.with_label_values(&[result]).inc();
    }

    /// Replace the info series of one policy.
    pub fn set_policy_info(&self, info: &PolicyInfo) {
        let key = format!("{}/{}", info.namespace, info.name);
        let values = info.label_values();
        match self.info_labels.lock() {
            Ok(mut last) => {
                if let Some(previous) = last.insert(key, values.clone()) {
                    if previous != values {
                        self.remove_info_series(&previous);
                    }
                }
            }
            Err(e) => warn!("Failed to lock policy info labels: {}", e),
        }
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        self.policy_info.with_label_values(refs.as_slice()).set(1);
    }

    /// Drop the info series of a deleted policy.
    pub fn forget_policy(&self, namespace: &str, name: &str) {
        let key = format!("{namespace}/{name}");
        match self.info_labels.lock() {
            Ok(mut last) => {
                if let Some(previous) = last.remove(&key) {
                    self.remove_info_series(&previous);
                }
            }
            Err(e) => warn!("Failed to lock policy info labels: {}", e),
        }
    }

    fn remove_info_series(&self, values: &[String; 6]) {
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        if let Err(e) = self.policy_info.remove_label_values(refs.as_slice()) {
            tracing::debug!("No info series to remove: {}", e);
        }
    }

    /// Clear per-policy series on shutdown.
    pub fn shutdown(&self) {
        self.policy_info.reset();
        if let Ok(mut last) = self.info_labels.lock() {
            last.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(state: &str) -> PolicyInfo {
        PolicyInfo {
            name: "orders".to_string(),
            namespace: "shop".to_string(),
            state: state.to_string(),
            issuer: "https://idp.example.com".to_string(),
            enabled: true,
            auto_login_enabled: false,
        }
    }

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().expect("metrics");
        let second = Metrics::new().expect("metrics");
        first.increment_reconciliations();
        assert!(first.encode().expect("encode").contains("authpolicy_reconciliations_total 1"));
        assert!(second.encode().expect("encode").contains("authpolicy_reconciliations_total 0"));
    }

    #[test]
    fn test_state_change_replaces_info_series() {
        let metrics = Metrics::new().expect("metrics");
        metrics.set_policy_info(&info("Pending"));
        metrics.set_policy_info(&info("Ready"));

        let text = metrics.encode().expect("encode");
        assert!(text.contains("state=\"Ready\""));
        assert!(!text.contains("state=\"Pending\""));
    }

    #[test]
    fn test_forget_policy_removes_series() {
        let metrics = Metrics::new().expect("metrics");
        metrics.set_policy_info(&info("Ready"));
        metrics.forget_policy("shop", "orders");
        assert!(!metrics.encode().expect("encode").contains("name=\"orders\""));
    }
}
