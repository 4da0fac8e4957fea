use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use keel_cloud::DeploymentMode;
use keel_core::ObjectKey;
use keel_state::EngineConfig;
use semver::Version;

#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace of the operator-wide default connection secret
    #[arg(long, env = "KEEL_GLOBAL_SECRET_NAMESPACE", default_value = "keel-system")]
    pub global_secret_namespace: String,

    /// Name of the operator-wide default connection secret
    #[arg(long, env = "KEEL_GLOBAL_SECRET_NAME", default_value = "keel-operator-api-key")]
    pub global_secret_name: String,

    /// Only watch this namespace (default: all namespaces)
    #[arg(long, env = "KEEL_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[arg(long, env = "KEEL_MAX_CONCURRENT_RECONCILES", default_value_t = 1)]
    pub max_concurrent_reconciles: u16,

    /// Keep external resources when their objects are deleted
    #[arg(long, env = "KEEL_DELETION_PROTECTION", action = ArgAction::SetTrue)]
    pub deletion_protection: bool,

    /// Seconds between re-verifications of objects without a local project
    #[arg(long, env = "KEEL_INDEPENDENT_SYNC_PERIOD", default_value_t = 900)]
    pub independent_sync_period: u64,

    /// Seconds before retrying a failed reconcile
    #[arg(long, env = "KEEL_DEFAULT_REQUEUE", default_value_t = 10)]
    pub default_requeue: u64,

    #[arg(long, env = "KEEL_CLOUD_BASE_URL", default_value = "https://cloud.mongodb.com/")]
    pub cloud_base_url: String,

    /// Seconds before an external service request times out
    #[arg(long, env = "KEEL_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,

    /// Target the restricted government deployment
    #[arg(long, env = "KEEL_GOVERNMENT", action = ArgAction::SetTrue)]
    pub government: bool,

    /// Version checked against resource-version labels
    #[arg(long, env = "KEEL_OPERATOR_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub operator_version: String,

    /// Log filter directives, e.g. `info,keel_state=debug`
    #[arg(long, env = "KEEL_LOG", default_value = "info")]
    pub log_filter: String,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "KEEL_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl OperatorConfig {
    pub fn global_secret(&self) -> ObjectKey {
        ObjectKey::new(&self.global_secret_namespace, &self.global_secret_name)
    }

    pub fn deployment_mode(&self) -> DeploymentMode {
        if self.government {
            DeploymentMode::Government
        } else {
            DeploymentMode::Commercial
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let operator_version = Version::parse(self.operator_version.trim_start_matches('v'))
            .with_context(|| format!("invalid operator version {:?}", self.operator_version))?;
        Ok(EngineConfig {
            default_requeue: Duration::from_secs(self.default_requeue),
            independent_sync_period: Duration::from_secs(self.independent_sync_period),
            deployment_mode: self.deployment_mode(),
            operator_version,
            deletion_protection: self.deletion_protection,
        })
    }
}
