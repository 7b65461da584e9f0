//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use authpolicy_controller::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::controller::reconciler::store::{KubeStore, ObjectStore, StoreError};
pub use crate::controller::reconciler::{
    reconcile, BackoffState, Reconciler, ReconcilerError, Scope,
};

pub use crate::config::ControllerConfig;
pub use crate::observability::Metrics;
