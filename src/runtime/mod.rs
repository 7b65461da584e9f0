//! # Runtime
//!
//! Startup, the watch loop and the error policies that drive it.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
