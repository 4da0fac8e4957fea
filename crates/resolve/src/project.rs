use std::sync::Arc;

use keel_cloud::{CloudApi, CloudProject};
use keel_core::credentials::ConnectionConfig;
use keel_core::reference::ProjectDualReference;
use keel_kubehub::ClusterReader;
use tracing::debug;

use crate::ResolveError;

/// Finds the external project a resource belongs to.
#[derive(Clone)]
pub struct ProjectResolver {
    reader: Arc<dyn ClusterReader>,
}

impl ProjectResolver {
    pub fn new(reader: Arc<dyn ClusterReader>) -> Self {
        Self { reader }
    }

    /// With a `projectRef`, the local Project is loaded and the external
    /// project is looked up by the name stored on it. With only an
    /// `externalProjectRef`, the external ID is used directly. `projectRef`
    /// wins if both are set.
    pub async fn resolve(
        &self,
        cloud: &dyn CloudApi,
        conn: &ConnectionConfig,
        namespace: &str,
        reference: &ProjectDualReference,
    ) -> Result<CloudProject, ResolveError> {
        if let Some(project_ref) = &reference.project_ref {
            let key = project_ref.key(namespace);
            let local = self
                .reader
                .get_project(&key)
                .await?
                .ok_or_else(|| ResolveError::MissingKubeProject(key.clone()))?;
            debug!(project = %key, external_name = %local.spec.name, "resolving project by name");
            return cloud
                .get_project_by_name(conn, &local.spec.name)
                .await?
                .ok_or(ResolveError::ProjectNotFound(local.spec.name));
        }
        if let Some(external) = &reference.external_project_ref {
            debug!(id = %external.id, "resolving project by external id");
            return cloud
                .get_project_by_id(conn, &external.id)
                .await?
                .ok_or_else(|| ResolveError::ProjectNotFound(external.id.clone()));
        }
        Err(ResolveError::NoProjectReference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_cloud::MockCloudApi;
    use keel_core::credentials::Credentials;
    use keel_core::crd::{Project, ProjectSpec};
    use keel_core::reference::{ExternalProjectReference, ProjectReference};
    use keel_kubehub::memory::MemoryStore;

    fn conn() -> ConnectionConfig {
        let data = [("orgId", "o"), ("publicApiKey", "pub"), ("privateApiKey", "priv")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConnectionConfig::from_api_keys(Credentials::from_secret_data(&data).unwrap())
    }

    fn cloud_project(id: &str, name: &str) -> CloudProject {
        CloudProject { id: id.into(), name: name.into(), org_id: "o".into() }
    }

    #[tokio::test]
    async fn project_ref_joins_on_external_name() {
        let store = Arc::new(MemoryStore::new());
        let mut local = Project::new("local-name", ProjectSpec { name: "Billing".into(), connection_secret_ref: None });
        local.metadata.namespace = Some("ns".into());
        store.insert(&local);

        let mut cloud = MockCloudApi::new();
        cloud
            .expect_get_project_by_name()
            .withf(|_, name| name.to_string() == "Billing")
            .times(1)
            .returning(|_, _| Ok(Some(cloud_project("p42", "Billing"))));
        cloud.expect_get_project_by_id().times(0);

        let r = ProjectDualReference {
            project_ref: Some(ProjectReference { name: "local-name".into(), namespace: None }),
            external_project_ref: Some(ExternalProjectReference { id: "ignored".into() }),
            ..Default::default()
        };
        let p = ProjectResolver::new(store).resolve(&cloud, &conn(), "ns", &r).await.unwrap();
        assert_eq!(p.id, "p42");
    }

    #[tokio::test]
    async fn external_ref_skips_local_lookup() {
        let store = Arc::new(MemoryStore::new());
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_get_project_by_id()
            .withf(|_, id| id.to_string() == "p1")
            .times(1)
            .returning(|_, _| Ok(Some(cloud_project("p1", "Remote"))));
        let r = ProjectDualReference {
            external_project_ref: Some(ExternalProjectReference { id: "p1".into() }),
            ..Default::default()
        };
        let p = ProjectResolver::new(store).resolve(&cloud, &conn(), "ns", &r).await.unwrap();
        assert_eq!(p.name, "Remote");
    }

    #[tokio::test]
    async fn missing_local_project_and_missing_external_project() {
        let store = Arc::new(MemoryStore::new());
        let cloud = MockCloudApi::new();
        let r = ProjectDualReference {
            project_ref: Some(ProjectReference { name: "ghost".into(), namespace: None }),
            ..Default::default()
        };
        let err = ProjectResolver::new(store.clone()).resolve(&cloud, &conn(), "ns", &r).await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingKubeProject(_)));

        let mut cloud = MockCloudApi::new();
        cloud.expect_get_project_by_id().returning(|_, _| Ok(None));
        let r = ProjectDualReference {
            external_project_ref: Some(ExternalProjectReference { id: "nope".into() }),
            ..Default::default()
        };
        let err = ProjectResolver::new(store).resolve(&cloud, &conn(), "ns", &r).await.unwrap_err();
        assert!(matches!(err, ResolveError::ProjectNotFound(id) if id == "nope"));
    }
}
