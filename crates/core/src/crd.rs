//! Custom resources reconciled (or referenced) by the engine.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::reference::{LocalRef, ProjectDualReference};
use crate::state::StateStatus;

/// A resource kind the generic state engine can drive.
pub trait Reconcilable:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Engine-owned status section, if any status has been written.
    fn state_status(&self) -> Option<&StateStatus>;

    /// Dual project reference carried by the spec, for kinds that have one.
    fn project_reference(&self) -> Option<&ProjectDualReference> {
        None
    }

    /// Connection secret the object itself names, for kinds that are not part
    /// of the dual-reference scheme.
    fn own_connection_secret(&self) -> Option<&LocalRef> {
        None
    }
}

/// Local mirror of a project in the external service.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "keel.sh",
    version = "v1",
    kind = "Project",
    namespaced,
    status = "ProjectStatus",
    shortname = "kproj",
    printcolumn = r#"{"name":"Name","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Project name in the external service; names are the join key.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret_ref: Option<LocalRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    #[serde(flatten)]
    pub common: StateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Reconcilable for Project {
    fn state_status(&self) -> Option<&StateStatus> {
        self.status.as_ref().map(|s| &s.common)
    }

    fn own_connection_secret(&self) -> Option<&LocalRef> {
        self.spec.connection_secret_ref.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpAccessEntry {
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Network access list of a project.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "keel.sh",
    version = "v1",
    kind = "IpAccessList",
    namespaced,
    status = "IpAccessListStatus",
    shortname = "kipal",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IpAccessListSpec {
    #[serde(flatten)]
    pub project: ProjectDualReference,
    #[serde(default)]
    pub entries: Vec<IpAccessEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpAccessListStatus {
    #[serde(flatten)]
    pub common: StateStatus,
}

impl Reconcilable for IpAccessList {
    fn state_status(&self) -> Option<&StateStatus> {
        self.status.as_ref().map(|s| &s.common)
    }

    fn project_reference(&self) -> Option<&ProjectDualReference> {
        Some(&self.spec.project)
    }
}
