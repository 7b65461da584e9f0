//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::events::EventSink;
use crate::controller::reconciler::resolve::DiscoveryResolver;
use crate::controller::reconciler::status::StatusError;
use crate::controller::reconciler::store::{KubeStore, ObjectStore, StoreError};
use crate::controller::resources::ResourceError;
use crate::observability::Metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Failed to read AuthPolicy: {0}")]
    Fetch(#[from] StoreError),
    #[error("Failed to render generated objects: {0}")]
    Render(#[from] ResourceError),
    #[error("Failed to update status: {0}")]
    Status(#[from] StatusError),
    /// One or more generated objects could not be applied; already reported in status
    #[error("{failed} generated object(s) failed to reconcile")]
    DescendantsFailed { failed: usize },
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context of every reconcile pass
pub struct Reconciler<S: ObjectStore = KubeStore> {
    pub store: S,
    pub discovery: Arc<dyn DiscoveryResolver>,
    pub events: Arc<dyn EventSink>,
    pub metrics: Arc<Metrics>,
    pub config: ControllerConfig,
    /// Backoff state per resource (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl<S: ObjectStore> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(
        store: S,
        discovery: Arc<dyn DiscoveryResolver>,
        events: Arc<dyn EventSink>,
        metrics: Arc<Metrics>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            discovery,
            events,
            metrics,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget the error history of a policy after a clean pass.
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }

    /// Next retry delay for a failed policy, in seconds, and its error count.
    pub fn next_backoff(&self, key: &str) -> Option<(u64, u32)> {
        let mut states = self.backoff_states.lock().ok()?;
        let state = states.entry(key.to_string()).or_insert_with(|| {
            BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
        });
        state.increment_error();
        Some((state.backoff.next_backoff_seconds(), state.error_count))
    }

    pub fn forget_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}
