use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use keel_cloud::{AccessEntry, CloudProject, MockCloudApi};
use keel_controllers::IpAccessListHandler;
use keel_core::conditions::{find, ConditionType};
use keel_core::crd::{IpAccessEntry, IpAccessList, IpAccessListSpec, Project, ProjectSpec};
use keel_core::reference::{ExternalProjectReference, LocalRef, ProjectDualReference, ProjectReference};
use keel_core::state::LifecycleState;
use keel_core::{ObjectKey, RESOURCE_POLICY_ANNOTATION};
use keel_kubehub::encode_secret_data;
use keel_kubehub::memory::MemoryStore;
use keel_resolve::{ConnectionResolver, ProjectResolver};
use keel_state::{EngineConfig, ReconcileError, StateReconciler};
use kube::api::ObjectMeta;

fn key() -> ObjectKey {
    ObjectKey::new("ns", "office")
}

fn seed(store: &MemoryStore, reference: ProjectDualReference) {
    let data = [("orgId", "o1"), ("publicApiKey", "pub"), ("privateApiKey", "priv")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for name in ["global", "creds"] {
        let ns = if name == "global" { "keel-system" } else { "ns" };
        store.insert(&Secret {
            metadata: ObjectMeta { namespace: Some(ns.into()), name: Some(name.into()), ..Default::default() },
            data: Some(encode_secret_data(&data)),
            ..Default::default()
        });
    }
    let mut project = Project::new("billing", ProjectSpec { name: "Billing".into(), connection_secret_ref: None });
    project.metadata.namespace = Some("ns".into());
    store.insert(&project);

    let mut list = IpAccessList::new(
        "office",
        IpAccessListSpec {
            project: reference,
            entries: vec![IpAccessEntry { cidr_block: "10.0.0.0/24".into(), comment: None }],
        },
    );
    list.metadata.namespace = Some("ns".into());
    store.insert(&list);
}

fn by_project_ref() -> ProjectDualReference {
    ProjectDualReference { project_ref: Some(ProjectReference { name: "billing".into(), namespace: None }), ..Default::default() }
}

fn cloud_with_project() -> MockCloudApi {
    let mut cloud = MockCloudApi::new();
    cloud
        .expect_get_project_by_name()
        .returning(|_, name| Ok(Some(CloudProject { id: "p1".into(), name: name.to_string(), org_id: "o1".into() })));
    cloud
}

fn engine(store: &Arc<MemoryStore>, cloud: MockCloudApi, config: EngineConfig) -> StateReconciler<IpAccessList, IpAccessListHandler> {
    let connections = ConnectionResolver::new(store.clone(), ObjectKey::new("keel-system", "global"));
    let projects = ProjectResolver::new(store.clone());
    StateReconciler::new(store.clone(), IpAccessListHandler::new(connections, projects, Arc::new(cloud)), config)
}

#[tokio::test]
async fn converges_then_stays_quiet() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, by_project_ref());
    let mut cloud = cloud_with_project();
    let mut listed = 0;
    cloud.expect_list_access_entries().times(2).returning(move |_, _| {
        listed += 1;
        if listed == 1 {
            Ok(vec![])
        } else {
            Ok(vec![AccessEntry { cidr_block: "10.0.0.0/24".into(), comment: None }])
        }
    });
    cloud
        .expect_add_access_entries()
        .withf(|_, project, entries| project.to_string() == "p1" && entries.len() == 1)
        .times(1)
        .returning(|_, _, _| Ok(()));
    cloud.expect_delete_access_entry().times(0);

    let engine = engine(&store, cloud, EngineConfig::default());
    for _ in 0..3 {
        engine.reconcile(&key()).await.unwrap();
    }
    let live: IpAccessList = store.get_typed(&key()).unwrap();
    let status = live.status.unwrap().common;
    assert_eq!(status.state, Some(LifecycleState::Updated));
    assert!(find(&status.conditions, ConditionType::IpAccessListReady).unwrap().is_true());
}

#[tokio::test]
async fn deletion_removes_entries() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, by_project_ref());
    let mut cloud = cloud_with_project();
    cloud
        .expect_list_access_entries()
        .returning(|_, _| Ok(vec![AccessEntry { cidr_block: "10.0.0.0/24".into(), comment: None }]));
    cloud
        .expect_delete_access_entry()
        .withf(|_, _, cidr| cidr.to_string() == "10.0.0.0/24")
        .times(1)
        .returning(|_, _, _| Ok(()));

    let engine = engine(&store, cloud, EngineConfig::default());
    engine.reconcile(&key()).await.unwrap();
    store.request_delete::<IpAccessList>(&key());
    engine.reconcile(&key()).await.unwrap();
    assert!(!store.contains::<IpAccessList>(&key()));
}

#[tokio::test]
async fn deletion_protection_leaves_external_entries() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, by_project_ref());
    let mut obj: IpAccessList = store.get_typed(&key()).unwrap();
    obj.metadata.annotations = Some([(RESOURCE_POLICY_ANNOTATION.to_string(), "keep".to_string())].into());
    store.insert(&obj);
    let mut cloud = MockCloudApi::new();
    cloud.expect_delete_access_entry().times(0);
    cloud.expect_list_access_entries().times(0);

    let engine = engine(&store, cloud, EngineConfig::default());
    engine.reconcile(&key()).await.unwrap();
    store.request_delete::<IpAccessList>(&key());
    engine.reconcile(&key()).await.unwrap();
    assert!(!store.contains::<IpAccessList>(&key()), "finalizer still released");
}

#[tokio::test]
async fn external_reference_without_secret_fails_validation() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        ProjectDualReference { external_project_ref: Some(ExternalProjectReference { id: "p1".into() }), ..Default::default() },
    );
    let engine = engine(&store, MockCloudApi::new(), EngineConfig::default());
    engine.reconcile(&key()).await.unwrap();
    let err = engine.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Handler { .. }));
    assert!(err.to_string().contains("local connection secret is required"), "{err}");

    let live: IpAccessList = store.get_typed(&key()).unwrap();
    let ready = find(&live.status.unwrap().common.conditions, ConditionType::Ready).cloned().unwrap();
    assert!(!ready.is_true());
}

#[tokio::test]
async fn external_reference_with_secret_uses_project_id() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        ProjectDualReference {
            external_project_ref: Some(ExternalProjectReference { id: "p9".into() }),
            connection_secret: Some(LocalRef { name: "creds".into() }),
            ..Default::default()
        },
    );
    let mut cloud = MockCloudApi::new();
    cloud
        .expect_get_project_by_id()
        .withf(|_, id| id.to_string() == "p9")
        .returning(|_, id| Ok(Some(CloudProject { id: id.to_string(), name: "Remote".into(), org_id: "o1".into() })));
    cloud
        .expect_list_access_entries()
        .withf(|_, project| project.to_string() == "p9")
        .returning(|_, _| Ok(vec![AccessEntry { cidr_block: "10.0.0.0/24".into(), comment: None }]));
    let config = EngineConfig::default();
    let period = config.independent_sync_period;
    let engine = engine(&store, cloud, config);
    engine.reconcile(&key()).await.unwrap();
    assert_eq!(engine.reconcile(&key()).await.unwrap(), Some(period));
}

async fn delete_after_initial_pass(store: &Arc<MemoryStore>, engine: &StateReconciler<IpAccessList, IpAccessListHandler>) {
    engine.reconcile(&key()).await.unwrap();
    let obj: IpAccessList = store.get_typed(&key()).unwrap();
    assert!(obj.metadata.finalizers.is_some_and(|f| !f.is_empty()), "finalizer set on the initial pass");
    store.request_delete::<IpAccessList>(&key());
}

#[tokio::test]
async fn invalid_reference_does_not_block_deletion() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        ProjectDualReference { external_project_ref: Some(ExternalProjectReference { id: "p1".into() }), ..Default::default() },
    );
    let engine = engine(&store, MockCloudApi::new(), EngineConfig::default());
    delete_after_initial_pass(&store, &engine).await;

    assert_eq!(engine.reconcile(&key()).await.unwrap(), None);
    assert!(!store.contains::<IpAccessList>(&key()));
}

#[tokio::test]
async fn removed_connection_secret_does_not_block_deletion() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, ProjectDualReference { connection_secret: Some(LocalRef { name: "creds".into() }), ..by_project_ref() });
    let engine = engine(&store, MockCloudApi::new(), EngineConfig::default());
    delete_after_initial_pass(&store, &engine).await;
    store.request_delete::<Secret>(&ObjectKey::new("ns", "creds"));

    engine.reconcile(&key()).await.unwrap();
    assert!(!store.contains::<IpAccessList>(&key()));
}

#[tokio::test]
async fn removed_project_does_not_block_deletion() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, by_project_ref());
    let engine = engine(&store, MockCloudApi::new(), EngineConfig::default());
    delete_after_initial_pass(&store, &engine).await;
    store.request_delete::<Project>(&ObjectKey::new("ns", "billing"));

    engine.reconcile(&key()).await.unwrap();
    assert!(!store.contains::<IpAccessList>(&key()));
}

#[tokio::test]
async fn transient_failure_during_deletion_keeps_the_finalizer() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, by_project_ref());
    let mut cloud = cloud_with_project();
    cloud.expect_list_access_entries().returning(|_, _| {
        Err(keel_cloud::CloudError::Api { endpoint: "/accessList".into(), status: 503, body: "unavailable".into() })
    });
    let engine = engine(&store, cloud, EngineConfig::default());
    delete_after_initial_pass(&store, &engine).await;

    assert!(engine.reconcile(&key()).await.is_err());
    assert!(store.contains::<IpAccessList>(&key()), "retried until cleanup succeeds");
}
