//! Adapters between [`StateReconciler`] and `kube::runtime::Controller`.

use std::sync::Arc;

use keel_core::crd::Reconcilable;
use keel_kubehub::object_key;
use kube::runtime::controller::Action;
use tracing::warn;

use crate::{ReconcileError, StateHandler, StateReconciler};

pub async fn reconcile<K, H>(obj: Arc<K>, engine: Arc<StateReconciler<K, H>>) -> Result<Action, ReconcileError>
where
    K: Reconcilable,
    H: StateHandler<K>,
{
    let key = object_key(obj.as_ref());
    Ok(match engine.reconcile(&key).await? {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    })
}

pub fn error_policy<K, H>(obj: Arc<K>, err: &ReconcileError, engine: Arc<StateReconciler<K, H>>) -> Action
where
    K: Reconcilable,
    H: StateHandler<K>,
{
    let after = err.requeue_after(engine.config().default_requeue);
    warn!(key = %object_key(obj.as_ref()), error = %err, ?after, "reconcile failed; requeueing");
    Action::requeue(after)
}
