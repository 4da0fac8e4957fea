use std::sync::Arc;
use std::time::{Duration, Instant};

use keel_core::conditions::{self, Condition, ConditionType, Reason};
use keel_core::crd::Reconcilable;
use keel_core::policy::{ObjectPolicy, ResourcePolicy};
use keel_core::state::{LifecycleState, StateStatus};
use keel_core::{ObjectKey, FINALIZER};
use keel_kubehub::ObjectStore;
use kube::ResourceExt;
use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};

use crate::{EngineConfig, HandlerContext, ReconcileError, StateHandler, Transition};

/// Generic per-kind reconcile loop.
pub struct StateReconciler<K: Reconcilable, H> {
    store: Arc<dyn ObjectStore<K>>,
    handler: H,
    config: EngineConfig,
}

impl<K: Reconcilable, H: StateHandler<K>> StateReconciler<K, H> {
    pub fn new(store: Arc<dyn ObjectStore<K>>, handler: H, config: EngineConfig) -> Self {
        Self { store, handler, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run one convergence attempt for `key`.
    ///
    /// `Ok(None)` means nothing is scheduled and the next watch event drives
    /// the object; `Ok(Some(d))` asks for another pass after `d`. Handler
    /// failures are recorded in status and returned as errors so the work
    /// queue retries them.
    #[instrument(skip(self), fields(kind = %K::kind(&())))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Option<Duration>, ReconcileError> {
        let started = Instant::now();
        let result = self.run(key).await;
        let outcome = match &result {
            Ok(Some(_)) => "requeue",
            Ok(None) => "done",
            Err(_) => "error",
        };
        let kind = K::kind(&()).to_string();
        counter!("reconcile_total", 1u64, "kind" => kind.clone(), "outcome" => outcome);
        histogram!("reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => kind);
        result
    }

    async fn run(&self, key: &ObjectKey) -> Result<Option<Duration>, ReconcileError> {
        let Some(obj) = self.store.get(key).await? else {
            debug!("object not found; treating as deleted");
            return Ok(None);
        };
        let policy = ObjectPolicy::from_meta(obj.meta());
        let deleting = obj.meta().deletion_timestamp.is_some();

        if policy.skip() {
            if deleting {
                self.release(&obj).await?;
            }
            debug!(deleting, "reconciliation skipped by policy");
            return Ok(None);
        }

        let previous = obj.state_status().cloned().unwrap_or_default();

        let mut gate_conditions = Vec::new();
        if let Err(msg) = policy.check_resource_version(&self.config.operator_version) {
            warn!(%msg, "resource version rejected");
            let failed = vec![
                Condition::falsy(ConditionType::Ready, Reason::InvalidResourceVersion, msg.clone()),
                Condition::falsy(ConditionType::ResourceVersionStatus, Reason::InvalidResourceVersion, msg),
            ];
            self.write_status(&obj, previous.state, previous.state_msg.clone(), failed).await?;
            return Ok(Some(self.config.default_requeue));
        }
        if policy.resource_version.is_some() {
            gate_conditions.push(Condition::truthy(ConditionType::ResourceVersionStatus, Reason::ResourceVersionValid));
        }

        let mode = self.config.deployment_mode;
        if !self.handler.supports(mode) {
            if deleting {
                self.release(&obj).await?;
                return Ok(None);
            }
            let msg = format!("{} is not supported in {mode} deployment mode", K::kind(&()));
            warn!(%mode, "unsupported deployment mode");
            let failed = vec![Condition::falsy(ConditionType::Ready, Reason::UnsupportedDeploymentMode, msg)];
            self.write_status(&obj, previous.state, previous.state_msg.clone(), failed).await?;
            return Ok(None);
        }

        let ctx = HandlerContext {
            key: key.clone(),
            deployment_mode: mode,
            deletion_protection: self.config.deletion_protection || policy.resource == ResourcePolicy::Keep,
        };
        let current = StateStatus::current_state(obj.state_status());
        let (phase, result) = if deleting {
            if !has_finalizer(&obj) {
                debug!("deletion requested before the finalizer was set; nothing to clean up");
                return Ok(None);
            }
            ("DeletionRequested", self.handler.handle_deletion_requested(&obj, &ctx).await)
        } else {
            match current {
                LifecycleState::Initial => ("Initial", Ok(Transition::to(LifecycleState::Updated))),
                LifecycleState::Created => ("Created", self.handler.handle_created(&obj, &ctx).await),
                LifecycleState::Updated => ("Updated", self.handler.handle_updated(&obj, &ctx).await),
                LifecycleState::Deleted => {
                    debug!("object already reached its terminal state");
                    return Ok(None);
                }
            }
        };

        let transition = match result {
            Ok(t) => t,
            Err(err) => {
                warn!(error = %err, phase, "handler failed");
                let reason = if deleting { Reason::Deleting } else { Reason::ReconcileError };
                let mut failed = vec![Condition::falsy(ConditionType::Ready, reason, err.to_string())];
                failed.extend(gate_conditions);
                self.write_status(&obj, previous.state, Some(err.to_string()), failed).await?;
                return Err(ReconcileError::Handler { state: phase.to_string(), source: err });
            }
        };

        let next = transition.next_state;
        let mut settled = vec![Condition::truthy(ConditionType::Ready, Reason::Settled)];
        settled.extend(gate_conditions);
        settled.extend(transition.conditions);
        let obj = self.write_status(&obj, Some(next), transition.message, settled).await?;

        if next.is_terminal() {
            self.release(&obj).await?;
            info!(phase, "cleanup complete; finalizer released");
            return Ok(None);
        }
        self.acquire(&obj).await?;
        if current != next {
            info!(from = %current, to = %next, "state transition");
        }
        if current == LifecycleState::Initial {
            return Ok(Some(Duration::ZERO));
        }
        if obj.project_reference().is_some_and(|r| r.is_external()) {
            return Ok(Some(self.config.independent_sync_period));
        }
        Ok(None)
    }

    /// Persist the engine-owned status and return the object as stored. An
    /// unchanged status is not written, so steady-state passes produce no
    /// watch events of their own.
    async fn write_status(
        &self,
        obj: &K,
        state: Option<LifecycleState>,
        state_msg: Option<String>,
        desired: Vec<Condition>,
    ) -> Result<K, ReconcileError> {
        let previous = obj.state_status().cloned().unwrap_or_default();
        let status = StateStatus {
            conditions: conditions::merge(&previous.conditions, desired),
            observed_generation: obj.meta().generation,
            state,
            state_msg,
        };
        if status == previous {
            return Ok(obj.clone());
        }
        Ok(self.store.patch_status(obj, &status).await?)
    }

    async fn acquire(&self, obj: &K) -> Result<(), ReconcileError> {
        if has_finalizer(obj) {
            return Ok(());
        }
        let mut finalizers = obj.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        self.store.set_finalizers(obj, finalizers).await?;
        debug!("finalizer added");
        Ok(())
    }

    async fn release(&self, obj: &K) -> Result<(), ReconcileError> {
        if !has_finalizer(obj) {
            return Ok(());
        }
        let finalizers = obj.finalizers().iter().filter(|f| *f != FINALIZER).cloned().collect();
        self.store.set_finalizers(obj, finalizers).await?;
        debug!("finalizer removed");
        Ok(())
    }
}

fn has_finalizer<K: Reconcilable>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}
