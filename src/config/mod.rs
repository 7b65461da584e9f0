//! # Configuration
//!
//! Process configuration read once at startup.

mod controller;

pub use controller::ControllerConfig;
