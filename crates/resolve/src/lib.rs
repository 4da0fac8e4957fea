//! Keel resolve: per-resource connection and project resolution.
//!
//! [`ConnectionResolver`] decides which credentials authenticate a reconcile;
//! [`ProjectResolver`] finds the external project a resource belongs to.

#![forbid(unsafe_code)]

mod connection;
mod project;

use keel_cloud::CloudError;
use keel_core::credentials::CredentialsError;
use keel_core::ObjectKey;
use keel_kubehub::StoreError;

pub use connection::ConnectionResolver;
pub use project::ProjectResolver;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// `projectRef` names a Project object that does not exist. Callers
    /// usually requeue and wait for it to appear.
    #[error("referenced Project {0} does not exist")]
    MissingKubeProject(ObjectKey),
    #[error("a local connection secret is required when externalProjectRef is set")]
    ConnectionSecretRequired,
    #[error("neither projectRef nor externalProjectRef is set")]
    NoProjectReference,
    #[error("connection secret {0} not found")]
    SecretNotFound(ObjectKey),
    #[error("invalid connection secret {key}: {source}")]
    InvalidCredentials {
        key: ObjectKey,
        #[source]
        source: CredentialsError,
    },
    #[error("access token for service account secret {0} is not ready")]
    TokenNotReady(ObjectKey),
    #[error("project {0:?} not found in the external service")]
    ProjectNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl ResolveError {
    /// Errors the user has to fix in a spec or secret, as opposed to faults
    /// that resolve on their own.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ResolveError::ConnectionSecretRequired
                | ResolveError::NoProjectReference
                | ResolveError::InvalidCredentials { .. }
        )
    }
}
