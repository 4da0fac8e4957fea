//! IP access list handler.

use std::sync::Arc;

use async_trait::async_trait;
use keel_cloud::{AccessEntry, CloudApi, CloudProject};
use keel_core::conditions::{Condition, ConditionType, Reason};
use keel_core::credentials::ConnectionConfig;
use keel_core::crd::IpAccessList;
use keel_core::state::LifecycleState;
use keel_resolve::{ConnectionResolver, ProjectResolver, ResolveError};
use keel_state::{HandlerContext, HandlerError, StateHandler, Transition};
use kube::ResourceExt;
use tracing::{debug, info, warn};

pub struct IpAccessListHandler {
    connections: ConnectionResolver,
    projects: ProjectResolver,
    cloud: Arc<dyn CloudApi>,
}

/// Entries to add and CIDR blocks to delete so that `current` matches
/// `desired`. Both sides empty means no drift.
pub fn diff(desired: &[AccessEntry], current: &[AccessEntry]) -> (Vec<AccessEntry>, Vec<String>) {
    let add = desired.iter().filter(|d| !current.contains(d)).cloned().collect();
    let delete = current
        .iter()
        .filter(|c| !desired.iter().any(|d| d.cidr_block == c.cidr_block))
        .map(|c| c.cidr_block.clone())
        .collect();
    (add, delete)
}

fn desired_entries(obj: &IpAccessList) -> Vec<AccessEntry> {
    let mut entries: Vec<AccessEntry> = obj
        .spec
        .entries
        .iter()
        .map(|e| AccessEntry { cidr_block: e.cidr_block.clone(), comment: e.comment.clone() })
        .collect();
    entries.sort();
    entries.dedup();
    entries
}

/// Resolution failures that leave no way to reach the external entries, so
/// deletion can complete without cleanup.
fn target_is_gone(e: &ResolveError) -> bool {
    e.is_validation()
        || matches!(
            e,
            ResolveError::MissingKubeProject(_) | ResolveError::ProjectNotFound(_) | ResolveError::SecretNotFound(_)
        )
}

impl IpAccessListHandler {
    pub fn new(connections: ConnectionResolver, projects: ProjectResolver, cloud: Arc<dyn CloudApi>) -> Self {
        Self { connections, projects, cloud }
    }

    async fn target(&self, obj: &IpAccessList) -> Result<(ConnectionConfig, CloudProject), HandlerError> {
        obj.spec.project.validate().map_err(|e| HandlerError::Failed(e.to_string()))?;
        let conn = self.connections.resolve(obj).await?;
        let namespace = obj.namespace().unwrap_or_default();
        let project = self.projects.resolve(self.cloud.as_ref(), &conn, &namespace, &obj.spec.project).await?;
        Ok((conn, project))
    }
}

#[async_trait]
impl StateHandler<IpAccessList> for IpAccessListHandler {
    async fn handle_updated(&self, obj: &IpAccessList, ctx: &HandlerContext) -> Result<Transition, HandlerError> {
        let (conn, project) = self.target(obj).await?;
        let current = self.cloud.list_access_entries(&conn, &project.id).await?;
        let desired = desired_entries(obj);
        let (add, delete) = diff(&desired, &current);
        if add.is_empty() && delete.is_empty() {
            debug!(key = %ctx.key, project = %project.id, "access list in sync");
        } else {
            info!(key = %ctx.key, project = %project.id, add = add.len(), delete = delete.len(), "updating access list");
            if !add.is_empty() {
                self.cloud.add_access_entries(&conn, &project.id, &add).await?;
            }
            for cidr in &delete {
                self.cloud.delete_access_entry(&conn, &project.id, cidr).await?;
            }
        }
        Ok(Transition::to(LifecycleState::Updated)
            .with_condition(Condition::truthy(ConditionType::IpAccessListReady, Reason::Settled)))
    }

    async fn handle_deletion_requested(&self, obj: &IpAccessList, ctx: &HandlerContext) -> Result<Transition, HandlerError> {
        if ctx.deletion_protection {
            info!(key = %ctx.key, "deletion protection enabled; leaving external entries in place");
            return Ok(Transition::to(LifecycleState::Deleted).with_message("unmanaged"));
        }
        if let Err(e) = obj.spec.project.validate() {
            warn!(key = %ctx.key, error = %e, "invalid project reference; nothing was created externally");
            return Ok(Transition::to(LifecycleState::Deleted));
        }
        let (conn, project) = match self.target(obj).await {
            Ok(t) => t,
            Err(HandlerError::Resolve(e)) if target_is_gone(&e) => {
                warn!(key = %ctx.key, error = %e, "project or credentials are gone; nothing left to clean up");
                return Ok(Transition::to(LifecycleState::Deleted));
            }
            Err(e) => return Err(e),
        };
        let current = self.cloud.list_access_entries(&conn, &project.id).await?;
        for entry in desired_entries(obj) {
            if current.iter().any(|c| c.cidr_block == entry.cidr_block) {
                self.cloud.delete_access_entry(&conn, &project.id, &entry.cidr_block).await?;
            }
        }
        info!(key = %ctx.key, project = %project.id, "access list entries removed");
        Ok(Transition::to(LifecycleState::Deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cidr: &str, comment: Option<&str>) -> AccessEntry {
        AccessEntry { cidr_block: cidr.into(), comment: comment.map(Into::into) }
    }

    #[test]
    fn diff_is_empty_when_equal() {
        let e = vec![entry("10.0.0.0/24", None), entry("192.168.1.1/32", Some("vpn"))];
        let (add, delete) = diff(&e, &e);
        assert!(add.is_empty() && delete.is_empty());
    }

    #[test]
    fn diff_adds_missing_and_deletes_extra() {
        let desired = vec![entry("10.0.0.0/24", Some("office"))];
        let current = vec![entry("10.0.0.0/24", None), entry("1.2.3.4/32", None)];
        let (add, delete) = diff(&desired, &current);
        assert_eq!(add, desired, "changed comment is re-posted");
        assert_eq!(delete, vec!["1.2.3.4/32".to_string()]);
    }
}
