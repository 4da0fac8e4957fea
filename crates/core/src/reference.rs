//! Project references: a resource names its owning project either through a
//! local `Project` object or through a bare external project ID.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ObjectKey;

/// Reference to an object in the referrer's own namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocalRef {
    pub name: String,
}

/// Pointer to a local `Project` object. The namespace defaults to the
/// referrer's namespace when unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ProjectReference {
    pub fn key(&self, default_namespace: &str) -> ObjectKey {
        let ns = self.namespace.as_deref().filter(|s| !s.is_empty()).unwrap_or(default_namespace);
        ObjectKey::new(ns, &self.name)
    }
}

/// Project identified directly by its external ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalProjectReference {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDualReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_ref: Option<ProjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_project_ref: Option<ExternalProjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret: Option<LocalRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("projectRef and externalProjectRef are mutually exclusive")]
    BothProjectReferences,
    #[error("a local connection secret is required when externalProjectRef is set")]
    ConnectionSecretRequired,
}

impl ProjectDualReference {
    /// Structural rules normally enforced at admission time.
    pub fn validate(&self) -> Result<(), ReferenceError> {
        if self.project_ref.is_some() && self.external_project_ref.is_some() {
            return Err(ReferenceError::BothProjectReferences);
        }
        if self.external_project_ref.is_some() && self.connection_secret.is_none() {
            return Err(ReferenceError::ConnectionSecretRequired);
        }
        Ok(())
    }

    /// True when the project lives only in the external service, so there is
    /// no local object whose events would trigger re-verification.
    pub fn is_external(&self) -> bool {
        self.project_ref.is_none() && self.external_project_ref.is_some()
    }
}
