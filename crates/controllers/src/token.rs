//! Service-account access-token refresh.
//!
//! Reconciles credential Secrets directly rather than through the state
//! engine. A Secret carrying `clientId`/`clientSecret` gets a companion token
//! Secret holding `accessToken` and `expiry`. The token is refreshed once two
//! thirds of its remaining lifetime has elapsed; every pass ends with either a
//! no-op for non-credential Secrets or an explicit requeue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use keel_cloud::{CloudError, TokenSource};
use keel_core::credentials::{AccessToken, CredentialsError, ServiceAccountCredentials};
use keel_core::{ObjectKey, ACCESS_TOKEN_ANNOTATION};
use keel_kubehub::{encode_secret_data, object_key, secret_data, SecretStore, StoreError};
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

/// Shortest refresh horizon; also the retry delay after a failed fetch.
pub const REFRESH_FLOOR: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid service account secret {key}: {source}")]
    InvalidCredentials {
        key: ObjectKey,
        #[source]
        source: CredentialsError,
    },
    #[error("fetching access token for {key}: {source}")]
    Fetch {
        key: ObjectKey,
        #[source]
        source: CloudError,
    },
}

impl TokenError {
    pub fn requeue_after(&self) -> Duration {
        REFRESH_FLOOR
    }
}

/// Delay until the token should be refreshed: two thirds of the lifetime
/// left at `now`. `None` when that falls inside the floor, meaning refresh
/// right away.
pub fn refresh_delay(expiry: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    let wait = ((expiry - now) * 2 / 3).to_std().ok()?;
    (wait > REFRESH_FLOOR).then_some(wait)
}

pub struct TokenReconciler {
    secrets: Arc<dyn SecretStore>,
    tokens: Arc<dyn TokenSource>,
}

impl TokenReconciler {
    pub fn new(secrets: Arc<dyn SecretStore>, tokens: Arc<dyn TokenSource>) -> Self {
        Self { secrets, tokens }
    }

    #[instrument(skip(self))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Option<Duration>, TokenError> {
        let Some(secret) = self.secrets.get_secret(key).await? else {
            return Ok(None);
        };
        let data = secret_data(&secret);
        if !ServiceAccountCredentials::is_service_account(&data) {
            return Ok(None);
        }
        let credentials = ServiceAccountCredentials::from_secret_data(&data)
            .map_err(|source| TokenError::InvalidCredentials { key: key.clone(), source })?;

        let annotated = secret.annotations().get(ACCESS_TOKEN_ANNOTATION).filter(|v| !v.is_empty()).cloned();
        let token_name = annotated.clone().unwrap_or_else(|| format!("{}-token", key.name));
        let token_key = ObjectKey::new(&key.namespace, &token_name);

        if let Some(existing) = self.secrets.get_secret(&token_key).await? {
            match AccessToken::from_secret_data(&secret_data(&existing)) {
                Ok(token) => {
                    if let Some(wait) = refresh_delay(token.expiry, Utc::now()) {
                        if annotated.is_none() {
                            self.secrets.annotate_secret(key, ACCESS_TOKEN_ANNOTATION, &token_name).await?;
                        }
                        debug!(token = %token_key, ?wait, "token still fresh");
                        return Ok(Some(wait));
                    }
                }
                Err(e) => warn!(token = %token_key, error = %e, "unreadable token secret; refreshing"),
            }
        }

        let token = match self.tokens.fetch_token(&credentials).await {
            Ok(t) => t,
            Err(source) => {
                counter!("token_refresh_total", 1u64, "outcome" => "error");
                return Err(TokenError::Fetch { key: key.clone(), source });
            }
        };
        counter!("token_refresh_total", 1u64, "outcome" => "refreshed");

        self.secrets.upsert_secret(token_secret(&secret, &token_key, &token)).await?;
        if annotated.is_none() {
            self.secrets.annotate_secret(key, ACCESS_TOKEN_ANNOTATION, &token_name).await?;
        }
        info!(token = %token_key, expiry = %token.expiry, "access token refreshed");
        Ok(Some(refresh_delay(token.expiry, Utc::now()).unwrap_or(REFRESH_FLOOR)))
    }
}

/// `kube::runtime::Controller` reconcile adapter.
pub async fn reconcile(secret: Arc<Secret>, ctx: Arc<TokenReconciler>) -> Result<Action, TokenError> {
    Ok(match ctx.reconcile(&object_key(secret.as_ref())).await? {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    })
}

pub fn error_policy(secret: Arc<Secret>, err: &TokenError, _: Arc<TokenReconciler>) -> Action {
    warn!(key = %object_key(secret.as_ref()), error = %err, "token refresh failed");
    Action::requeue(err.requeue_after())
}

/// Token Secret owned by the credential Secret, so deleting the credentials
/// garbage-collects the token.
fn token_secret(owner: &Secret, key: &ObjectKey, token: &AccessToken) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        data: Some(encode_secret_data(&token.to_secret_data())),
        ..Default::default()
    }
}
