//! Keel core types: the condition/status model, lifecycle states, project
//! references, credentials and the CRDs the engine reconciles.

#![forbid(unsafe_code)]

pub mod conditions;
pub mod credentials;
pub mod crd;
pub mod policy;
pub mod reference;
pub mod state;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Finalizer token marking this engine's cleanup obligation.
pub const FINALIZER: &str = "keel.sh/finalizer";

/// Annotation selecting the reconciliation policy (`skip` bypasses convergence).
pub const RECONCILIATION_POLICY_ANNOTATION: &str = "keel.sh/reconciliation-policy";

/// Annotation selecting the resource policy (`keep` enables deletion protection).
pub const RESOURCE_POLICY_ANNOTATION: &str = "keel.sh/resource-policy";

/// Label carrying the resource schema version the object was written against.
pub const RESOURCE_VERSION_LABEL: &str = "keel.sh/resource-version";

/// Annotation on a credential Secret naming its derived access-token Secret.
pub const ACCESS_TOKEN_ANNOTATION: &str = "keel.sh/access-token";

/// Raw string data of a Secret, keyed by data field name.
pub type SecretData = std::collections::BTreeMap<String, String>;

/// Namespace + name of a namespaced cluster object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub mod prelude {
    pub use super::conditions::{Condition, ConditionStatus, ConditionType, Reason};
    pub use super::credentials::{AccessToken, ConnectionConfig, Credentials, ServiceAccountCredentials};
    pub use super::crd::{IpAccessList, Project, Reconcilable};
    pub use super::policy::{ObjectPolicy, ReconcilePolicy, ResourcePolicy};
    pub use super::reference::{ExternalProjectReference, LocalRef, ProjectDualReference, ProjectReference};
    pub use super::state::{LifecycleState, StateStatus};
    pub use super::{ObjectKey, SecretData};
}
