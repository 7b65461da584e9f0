//! # Observability
//!
//! - `metrics`: Prometheus metrics collection

pub mod metrics;

pub use metrics::{Metrics, PolicyInfo};
