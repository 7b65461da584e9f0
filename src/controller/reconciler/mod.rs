//! # Reconciler
//!
//! Turns an `AuthPolicy` into the Istio objects that enforce it and reports
//! the result on the policy's status.
//!
//! ## Reconciliation Flow
//!
//! 1. Resolve the policy into a [`Scope`]: discovery documents, audience
//!    values, OAuth client credentials and the pod secret mounts. Any
//!    failure marks the scope invalid, which compiles to deny-all.
//! 2. Build one [`action::ReconcileAction`] per generated object
//! 3. Converge each object (create, update or delete) through the
//!    [`store::ObjectStore`]
//! 4. Derive state and conditions and persist the status

pub mod action;
pub mod actions;
pub mod events;
pub mod reconcile;
pub mod resolve;
pub mod scope;
pub mod status;
pub mod store;
pub mod types;

pub use reconcile::reconcile;
pub use scope::Scope;
pub use types::{BackoffState, Reconciler, ReconcilerError};
