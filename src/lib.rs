//! AuthPolicy Controller Library
//!
//! Compiles `AuthPolicy` resources into Istio `RequestAuthentication`,
//! `AuthorizationPolicy` and `EnvoyFilter` objects plus the SDS secret that
//! backs the OAuth2 login filter.
//!
//! ## Quick Start
//!
//! ```rust
//! use authpolicy_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
