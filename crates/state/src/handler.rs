use async_trait::async_trait;
use keel_cloud::{CloudError, DeploymentMode};
use keel_core::conditions::Condition;
use keel_core::crd::Reconcilable;
use keel_core::state::LifecycleState;
use keel_core::ObjectKey;
use keel_kubehub::StoreError;
use keel_resolve::ResolveError;

/// Outcome of a successful handler callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next_state: LifecycleState,
    pub message: Option<String>,
    /// Kind-specific conditions recorded next to `Ready`.
    pub conditions: Vec<Condition>,
}

impl Transition {
    pub fn to(next_state: LifecycleState) -> Self {
        Self { next_state, message: None, conditions: Vec::new() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Failed(String),
}

/// Per-reconcile facts handed to every callback.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub key: ObjectKey,
    pub deployment_mode: DeploymentMode,
    /// True when either the global flag or the object's resource policy asks
    /// to keep the external resource on deletion.
    pub deletion_protection: bool,
}

/// Kind-specific lifecycle callbacks.
///
/// `Initial` is handled by the engine itself and never reaches a handler.
/// Handlers must compare before they write: `handle_updated` on an object
/// with no drift issues no external update.
#[async_trait]
pub trait StateHandler<K: Reconcilable>: Send + Sync {
    /// Whether this kind is offered in the given deployment mode.
    fn supports(&self, _mode: DeploymentMode) -> bool {
        true
    }

    async fn handle_created(&self, obj: &K, ctx: &HandlerContext) -> Result<Transition, HandlerError> {
        self.handle_updated(obj, ctx).await
    }

    async fn handle_updated(&self, obj: &K, ctx: &HandlerContext) -> Result<Transition, HandlerError>;

    /// Clean up (or unmanage, under deletion protection) and return
    /// `Deleted` once done.
    async fn handle_deletion_requested(&self, obj: &K, ctx: &HandlerContext) -> Result<Transition, HandlerError>;
}
