//! reqwest implementation of the external service seams.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use keel_core::credentials::{AccessToken, Auth, ConnectionConfig, ServiceAccountCredentials};
use metrics::{counter, histogram};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use crate::{AccessEntry, CloudApi, CloudError, CloudProject, TokenSource};

const API_PREFIX: [&str; 3] = ["api", "atlas", "v2"];
const ACCEPT: &str = "application/vnd.atlas.2023-01-01+json";

#[derive(Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct Paginated<T> {
    #[serde(default)]
    results: Vec<T>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Clone)]
pub struct HttpCloud {
    http: reqwest::Client,
    base: Url,
}

impl HttpCloud {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CloudError> {
        let base = Url::parse(base_url).map_err(|e| CloudError::InvalidEndpoint(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(CloudError::InvalidEndpoint(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keel-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CloudError::Transport { endpoint: base_url.to_string(), source: e })?;
        Ok(Self { http, base })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, CloudError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| CloudError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, CloudError> {
        let all: Vec<&str> = API_PREFIX.iter().copied().chain(segments.iter().copied()).collect();
        self.url(&all)
    }

    fn request(&self, method: Method, url: Url, conn: &ConnectionConfig) -> RequestBuilder {
        let rb = self.http.request(method, url).header(reqwest::header::ACCEPT, ACCEPT);
        match &conn.auth {
            Auth::ApiKeys(c) => rb.basic_auth(&c.public_key, Some(c.private_key.expose_secret())),
            Auth::Bearer(t) => rb.bearer_auth(t.token.expose_secret()),
        }
    }

    /// Send, map non-success statuses to `CloudError::Api`, treat 404 as `None`.
    async fn send<T: DeserializeOwned>(&self, rb: RequestBuilder, endpoint: &str) -> Result<Option<T>, CloudError> {
        let started = Instant::now();
        let resp = rb.send().await.map_err(|e| CloudError::Transport { endpoint: endpoint.to_string(), source: e })?;
        let status = resp.status();
        histogram!("cloud_request_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(%endpoint, status = status.as_u16(), "cloud request");
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            counter!("cloud_request_errors_total", 1u64);
            let body = resp.text().await.unwrap_or_default();
            return Err(CloudError::Api { endpoint: endpoint.to_string(), status: status.as_u16(), body });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(serde_json::from_value(serde_json::Value::Null).ok());
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| CloudError::Transport { endpoint: endpoint.to_string(), source: e })
    }
}

#[async_trait]
impl CloudApi for HttpCloud {
    async fn get_project_by_name(&self, conn: &ConnectionConfig, name: &str) -> Result<Option<CloudProject>, CloudError> {
        let url = self.api_url(&["groups", "byName", name])?;
        let endpoint = url.path().to_string();
        self.send(self.request(Method::GET, url, conn), &endpoint).await
    }

    async fn get_project_by_id(&self, conn: &ConnectionConfig, id: &str) -> Result<Option<CloudProject>, CloudError> {
        let url = self.api_url(&["groups", id])?;
        let endpoint = url.path().to_string();
        self.send(self.request(Method::GET, url, conn), &endpoint).await
    }

    async fn list_access_entries(&self, conn: &ConnectionConfig, project_id: &str) -> Result<Vec<AccessEntry>, CloudError> {
        let url = self.api_url(&["groups", project_id, "accessList"])?;
        let endpoint = url.path().to_string();
        let page: Option<Paginated<AccessEntry>> = self.send(self.request(Method::GET, url, conn), &endpoint).await?;
        Ok(page.map(|p| p.results).unwrap_or_default())
    }

    async fn add_access_entries(
        &self,
        conn: &ConnectionConfig,
        project_id: &str,
        entries: &[AccessEntry],
    ) -> Result<(), CloudError> {
        let url = self.api_url(&["groups", project_id, "accessList"])?;
        let endpoint = url.path().to_string();
        let rb = self.request(Method::POST, url, conn).json(entries);
        let _: Option<serde_json::Value> = self.send(rb, &endpoint).await?;
        Ok(())
    }

    async fn delete_access_entry(&self, conn: &ConnectionConfig, project_id: &str, cidr_block: &str) -> Result<(), CloudError> {
        // The CIDR becomes one path segment; its '/' is percent-encoded.
        let url = self.api_url(&["groups", project_id, "accessList", cidr_block])?;
        let endpoint = url.path().to_string();
        let _: Option<serde_json::Value> = self.send(self.request(Method::DELETE, url, conn), &endpoint).await?;
        Ok(())
    }
}

/// Absolute expiry of a token issued at `issued_at` with a lifetime of
/// `expires_in` seconds. Out-of-range lifetimes are an API error.
fn token_expiry(issued_at: DateTime<Utc>, expires_in: i64, endpoint: &str) -> Result<DateTime<Utc>, CloudError> {
    TimeDelta::try_seconds(expires_in)
        .and_then(|ttl| issued_at.checked_add_signed(ttl))
        .ok_or_else(|| CloudError::Api {
            endpoint: endpoint.to_string(),
            status: 200,
            body: format!("expires_in out of range: {expires_in}"),
        })
}

#[async_trait]
impl TokenSource for HttpCloud {
    async fn fetch_token(&self, credentials: &ServiceAccountCredentials) -> Result<AccessToken, CloudError> {
        let url = self.url(&["api", "oauth", "token"])?;
        let endpoint = url.path().to_string();
        let rb = self
            .http
            .post(url)
            .basic_auth(&credentials.client_id, Some(credentials.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")]);
        let issued_at = Utc::now();
        let resp: TokenResponse = self
            .send(rb, &endpoint)
            .await?
            .ok_or_else(|| CloudError::Api { endpoint: endpoint.clone(), status: 404, body: "token endpoint not found".into() })?;
        let expiry = token_expiry(issued_at, resp.expires_in, &endpoint)?;
        Ok(AccessToken { token: SecretString::from(resp.access_token), expiry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_encode_cidr_as_single_segment() {
        let c = HttpCloud::new("https://cloud.example.com/", Duration::from_secs(5)).unwrap();
        let url = c.api_url(&["groups", "p1", "accessList", "10.0.0.0/24"]).unwrap();
        assert_eq!(url.as_str(), "https://cloud.example.com/api/atlas/v2/groups/p1/accessList/10.0.0.0%2F24");
    }

    #[test]
    fn token_url_is_outside_api_prefix() {
        let c = HttpCloud::new("https://cloud.example.com", Duration::from_secs(5)).unwrap();
        assert_eq!(c.url(&["api", "oauth", "token"]).unwrap().as_str(), "https://cloud.example.com/api/oauth/token");
    }

    #[test]
    fn access_list_page_without_results_is_empty() {
        let page: Paginated<AccessEntry> = serde_json::from_str(r#"{"totalCount":0}"#).unwrap();
        assert!(page.results.is_empty());
        let page: Paginated<AccessEntry> =
            serde_json::from_str(r#"{"results":[{"cidrBlock":"10.0.0.0/24","comment":"office"}]}"#).unwrap();
        assert_eq!(page.results[0].cidr_block, "10.0.0.0/24");
    }

    #[test]
    fn token_expiry_rejects_out_of_range_lifetimes() {
        let now = Utc::now();
        assert_eq!(token_expiry(now, 3600, "/t").unwrap(), now + TimeDelta::hours(1));
        assert!(matches!(token_expiry(now, i64::MAX, "/t"), Err(CloudError::Api { .. })));
        assert!(matches!(token_expiry(DateTime::<Utc>::MAX_UTC, 60, "/t"), Err(CloudError::Api { .. })));
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(matches!(
            HttpCloud::new("mailto:ops@example.com", Duration::from_secs(5)),
            Err(CloudError::InvalidEndpoint(_))
        ));
    }
}
