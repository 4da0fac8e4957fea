//! Keel state: the generic reconciliation engine.
//!
//! One [`StateReconciler`] per resource kind drives objects through
//! `Initial -> Updated -> ... -> Deleted`, delegating external work to a
//! kind-specific [`StateHandler`]. The engine owns the gates (skip policy,
//! resource version, deployment mode), the finalizer protocol, status writes
//! and requeue decisions.

#![forbid(unsafe_code)]

pub mod controller;
mod engine;
mod handler;

use std::time::Duration;

use keel_cloud::DeploymentMode;
use keel_kubehub::StoreError;
use semver::Version;

pub use engine::StateReconciler;
pub use handler::{HandlerContext, HandlerError, StateHandler, Transition};

/// Retry delay after an optimistic-concurrency conflict; the next attempt
/// starts from a fresh fetch.
pub const CONFLICT_BACKOFF: Duration = Duration::from_secs(1);

/// Engine settings shared by every reconcile of one controller.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backoff after handler failures and resource-version gate failures.
    pub default_requeue: Duration,
    /// Re-verification period for objects with no local project to watch.
    pub independent_sync_period: Duration,
    pub deployment_mode: DeploymentMode,
    /// Version compared against the `keel.sh/resource-version` label.
    pub operator_version: Version,
    /// Global deletion protection; objects may also opt in individually.
    pub deletion_protection: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_requeue: Duration::from_secs(10),
            independent_sync_period: Duration::from_secs(15 * 60),
            deployment_mode: DeploymentMode::Commercial,
            operator_version: Version::new(0, 0, 0),
            deletion_protection: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{state} handler failed: {source}")]
    Handler {
        state: String,
        #[source]
        source: HandlerError,
    },
}

impl ReconcileError {
    pub fn requeue_after(&self, default: Duration) -> Duration {
        match self {
            ReconcileError::Store(StoreError::Conflict { .. }) => CONFLICT_BACKOFF.min(default),
            _ => default,
        }
    }
}
