//! # Controller
//!
//! Core controller modules for the AuthPolicy controller.
//!
//! - `authz`: Compiles issuer rules into deny, ignore and require rule sets
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `paths`: Path template validation and compilation
//! - `reconciler`: Core reconciliation logic
//! - `resources`: Desired state of every generated object
//! - `server`: HTTP server for metrics and health checks

pub mod authz;
pub mod backoff;
pub mod paths;
pub mod reconciler;
pub mod resources;
pub mod server;
