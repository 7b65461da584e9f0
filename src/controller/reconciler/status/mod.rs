//! # Status Management
//!
//! Derives the AuthPolicy status from the outcome of one pass and persists it.
//!
//! - `state` - overall state and message
//! - `conditions` - summary, per-object and missing-object conditions
//! - `updater` - change detection, conflict retries, events and the info metric

mod conditions;
mod state;
mod updater;

pub use conditions::build_conditions;
pub use state::{determine_state, status_message, Expected};
pub use updater::{build_status, update_status, StatusOutcome};

use crate::controller::reconciler::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status write kept conflicting after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode status: {0}")]
    Encode(#[source] serde_json::Error),
}
