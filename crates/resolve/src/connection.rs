use std::sync::Arc;

use chrono::Utc;
use keel_core::credentials::{AccessToken, Auth, ConnectionConfig, Credentials, ServiceAccountCredentials};
use keel_core::crd::Reconcilable;
use keel_core::reference::{LocalRef, ProjectDualReference};
use keel_core::{ObjectKey, ACCESS_TOKEN_ANNOTATION};
use keel_kubehub::{secret_data, ClusterReader};
use kube::ResourceExt;
use tracing::debug;

use crate::ResolveError;

/// Resolves the connection secret that applies to a resource.
///
/// Precedence, highest first: the secret named on the referrer's dual
/// reference, the secret configured on the referenced local Project, the
/// secret the object names for itself, then the operator-wide default.
#[derive(Clone)]
pub struct ConnectionResolver {
    reader: Arc<dyn ClusterReader>,
    global_secret: ObjectKey,
}

impl ConnectionResolver {
    pub fn new(reader: Arc<dyn ClusterReader>, global_secret: ObjectKey) -> Self {
        Self { reader, global_secret }
    }

    pub fn global_secret(&self) -> &ObjectKey {
        &self.global_secret
    }

    pub async fn resolve<K: Reconcilable>(&self, obj: &K) -> Result<ConnectionConfig, ResolveError> {
        let namespace = obj.namespace().unwrap_or_default();
        let key = self.secret_key(&namespace, obj.project_reference(), obj.own_connection_secret()).await?;
        self.load(&key).await
    }

    /// Pick the secret without reading it.
    pub async fn secret_key(
        &self,
        namespace: &str,
        reference: Option<&ProjectDualReference>,
        own_secret: Option<&LocalRef>,
    ) -> Result<ObjectKey, ResolveError> {
        if let Some(r) = reference {
            if let Some(secret) = &r.connection_secret {
                return Ok(ObjectKey::new(namespace, &secret.name));
            }
            if r.is_external() {
                return Err(ResolveError::ConnectionSecretRequired);
            }
            if let Some(project_ref) = &r.project_ref {
                let project_key = project_ref.key(namespace);
                let project = self
                    .reader
                    .get_project(&project_key)
                    .await?
                    .ok_or_else(|| ResolveError::MissingKubeProject(project_key.clone()))?;
                if let Some(secret) = &project.spec.connection_secret_ref {
                    return Ok(ObjectKey::new(&project_key.namespace, &secret.name));
                }
                debug!(project = %project_key, "project has no connection secret; using global default");
            }
        }
        if let Some(secret) = own_secret {
            return Ok(ObjectKey::new(namespace, &secret.name));
        }
        Ok(self.global_secret.clone())
    }

    /// Read a connection secret and turn it into a ready-to-use config.
    pub async fn load(&self, key: &ObjectKey) -> Result<ConnectionConfig, ResolveError> {
        let secret = self.reader.get_secret(key).await?.ok_or_else(|| ResolveError::SecretNotFound(key.clone()))?;
        let data = secret_data(&secret);
        if !ServiceAccountCredentials::is_service_account(&data) {
            let credentials = Credentials::from_secret_data(&data)
                .map_err(|source| ResolveError::InvalidCredentials { key: key.clone(), source })?;
            return Ok(ConnectionConfig::from_api_keys(credentials));
        }

        ServiceAccountCredentials::require_org_id(&data)
            .map_err(|source| ResolveError::InvalidCredentials { key: key.clone(), source })?;
        let org_id = data.get(keel_core::credentials::ORG_ID_KEY).cloned().unwrap_or_default();
        let not_ready = || ResolveError::TokenNotReady(key.clone());
        let token_name = secret.annotations().get(ACCESS_TOKEN_ANNOTATION).cloned().ok_or_else(not_ready)?;
        let token_secret = self
            .reader
            .get_secret(&ObjectKey::new(&key.namespace, token_name))
            .await?
            .ok_or_else(not_ready)?;
        let token = AccessToken::from_secret_data(&secret_data(&token_secret)).map_err(|_| not_ready())?;
        if token.expiry <= Utc::now() {
            return Err(not_ready());
        }
        Ok(ConnectionConfig { org_id, auth: Auth::Bearer(token) })
    }
}
