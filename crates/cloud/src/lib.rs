//! Keel cloud: the external service as seen by the engine.
//!
//! Everything the engine and the handlers need from the external service goes
//! through [`CloudApi`] and [`TokenSource`]. [`http::HttpCloud`] is the
//! reqwest-backed implementation; tests use the generated mocks.

#![forbid(unsafe_code)]

pub mod http;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use keel_core::credentials::{AccessToken, ConnectionConfig, ServiceAccountCredentials};
use serde::{Deserialize, Serialize};

pub use http::HttpCloud;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Api { endpoint: String, status: u16, body: String },
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
}

impl CloudError {
    /// Network faults, throttling and server errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Transport { .. } => true,
            CloudError::Api { status, .. } => *status == 429 || *status >= 500,
            CloudError::InvalidEndpoint(_) => false,
        }
    }
}

/// Deployment mode of the external service. Some resource kinds are not
/// offered in the restricted government mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeploymentMode {
    #[default]
    Commercial,
    Government,
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "commercial" => Ok(DeploymentMode::Commercial),
            "government" | "gov" => Ok(DeploymentMode::Government),
            other => Err(format!("unknown deployment mode {other:?}")),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::Commercial => f.write_str("commercial"),
            DeploymentMode::Government => f.write_str("government"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub org_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Operations against the external service. Every call authenticates with
/// the connection resolved for the current reconcile.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn get_project_by_name(&self, conn: &ConnectionConfig, name: &str) -> Result<Option<CloudProject>, CloudError>;

    async fn get_project_by_id(&self, conn: &ConnectionConfig, id: &str) -> Result<Option<CloudProject>, CloudError>;

    async fn list_access_entries(&self, conn: &ConnectionConfig, project_id: &str) -> Result<Vec<AccessEntry>, CloudError>;

    async fn add_access_entries(
        &self,
        conn: &ConnectionConfig,
        project_id: &str,
        entries: &[AccessEntry],
    ) -> Result<(), CloudError>;

    async fn delete_access_entry(&self, conn: &ConnectionConfig, project_id: &str, cidr_block: &str) -> Result<(), CloudError>;
}

/// OAuth token endpoint for service-account credentials.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self, credentials: &ServiceAccountCredentials) -> Result<AccessToken, CloudError>;
}
