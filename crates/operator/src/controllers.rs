//! Controller wiring: one `kube::runtime::Controller` per reconciled kind.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use keel_cloud::HttpCloud;
use keel_controllers::{token, IpAccessListHandler, TokenReconciler};
use keel_core::crd::IpAccessList;
use keel_core::ObjectKey;
use keel_kubehub::{get_kube_client, object_key, KubeStore};
use keel_resolve::{ConnectionResolver, ProjectResolver};
use keel_state::StateReconciler;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, Resource};
use tracing::{debug, error, info};

use crate::config::OperatorConfig;

fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Access lists to re-enqueue when `secret` changes: those naming it as their
/// connection secret, and every list relying on the default when it is the
/// operator-wide secret.
pub fn dependents<I>(lists: I, secret: &ObjectKey, global: &ObjectKey) -> Vec<ObjectRef<IpAccessList>>
where
    I: IntoIterator<Item = Arc<IpAccessList>>,
{
    lists
        .into_iter()
        .filter(|list| {
            let key = object_key(list.as_ref());
            match &list.spec.project.connection_secret {
                Some(local) => key.namespace == secret.namespace && local.name == secret.name,
                None => secret == global,
            }
        })
        .map(|list| ObjectRef::from_obj(list.as_ref()))
        .collect()
}

fn log_result<T: std::fmt::Debug, E: std::fmt::Debug>(controller: &'static str) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(obj) => debug!(?obj, controller, "reconciled"),
            Err(e) => error!(error = ?e, controller, "reconcile failed"),
        }
        std::future::ready(())
    }
}

pub async fn run(config: OperatorConfig) -> Result<()> {
    let engine_config = config.engine_config()?;
    let client = get_kube_client().await.context("connecting to the cluster")?;
    let store = Arc::new(KubeStore::new(client.clone()));
    let cloud = Arc::new(HttpCloud::new(&config.cloud_base_url, config.request_timeout()).context("cloud client")?);
    let global = config.global_secret();
    let namespace = config.watch_namespace.as_deref();

    let handler = IpAccessListHandler::new(
        ConnectionResolver::new(store.clone(), global.clone()),
        ProjectResolver::new(store.clone()),
        cloud.clone(),
    );
    let engine = Arc::new(StateReconciler::new(store.clone(), handler, engine_config));

    let lists: Api<IpAccessList> = api(client.clone(), namespace);
    let secrets: Api<Secret> = api(client.clone(), namespace);

    let access_lists = Controller::new(lists, watcher::Config::default());
    let reader = access_lists.store();
    let access_lists = access_lists
        .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles))
        .watches(secrets.clone(), watcher::Config::default(), move |secret: Secret| {
            dependents(reader.state(), &object_key(&secret), &global)
        })
        .shutdown_on_signal()
        .run(
            keel_state::controller::reconcile::<IpAccessList, IpAccessListHandler>,
            keel_state::controller::error_policy::<IpAccessList, IpAccessListHandler>,
            engine,
        )
        .for_each(log_result("IpAccessList"));

    let tokens = Arc::new(TokenReconciler::new(store, cloud));
    let token_refresh = Controller::new(secrets, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles))
        .shutdown_on_signal()
        .run(token::reconcile, token::error_policy, tokens)
        .for_each(log_result("ServiceAccountToken"));

    info!(namespace = namespace.unwrap_or("*"), mode = %config.deployment_mode(), "controllers started");
    tokio::join!(access_lists, token_refresh);
    info!("controllers stopped");
    Ok(())
}
