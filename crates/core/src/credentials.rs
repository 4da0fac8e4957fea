//! Credentials read from connection Secrets.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::SecretData;

pub const ORG_ID_KEY: &str = "orgId";
pub const PUBLIC_API_KEY_KEY: &str = "publicApiKey";
pub const PRIVATE_API_KEY_KEY: &str = "privateApiKey";
pub const CLIENT_ID_KEY: &str = "clientId";
pub const CLIENT_SECRET_KEY: &str = "clientSecret";
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const EXPIRY_KEY: &str = "expiry";

const API_KEY_FIELDS: [&str; 3] = [ORG_ID_KEY, PUBLIC_API_KEY_KEY, PRIVATE_API_KEY_KEY];
const SERVICE_ACCOUNT_FIELDS: [&str; 3] = [ORG_ID_KEY, CLIENT_ID_KEY, CLIENT_SECRET_KEY];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("the following fields are missing in the secret: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("invalid token expiry {value:?}: {message}")]
    InvalidExpiry { value: String, message: String },
}

fn missing(data: &SecretData, fields: &[&'static str]) -> Vec<&'static str> {
    fields
        .iter()
        .copied()
        .filter(|k| data.get(*k).map(|v| v.is_empty()).unwrap_or(true))
        .collect()
}

/// API key fields absent (or empty) in `data`, in canonical order.
pub fn missing_api_key_fields(data: &SecretData) -> Vec<&'static str> {
    missing(data, &API_KEY_FIELDS)
}

/// API key pair plus the organization it belongs to.
pub struct Credentials {
    pub org_id: String,
    pub public_key: String,
    pub private_key: SecretString,
}

impl Credentials {
    pub fn from_secret_data(data: &SecretData) -> Result<Self, CredentialsError> {
        let absent = missing_api_key_fields(data);
        if !absent.is_empty() {
            return Err(CredentialsError::MissingFields(absent));
        }
        Ok(Self {
            org_id: data[ORG_ID_KEY].clone(),
            public_key: data[PUBLIC_API_KEY_KEY].clone(),
            private_key: SecretString::from(data[PRIVATE_API_KEY_KEY].clone()),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("org_id", &self.org_id)
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// OAuth client credentials of a service account.
pub struct ServiceAccountCredentials {
    pub org_id: Option<String>,
    pub client_id: String,
    pub client_secret: SecretString,
}

impl ServiceAccountCredentials {
    /// True when the secret carries the service-account client fields.
    pub fn is_service_account(data: &SecretData) -> bool {
        missing(data, &[CLIENT_ID_KEY, CLIENT_SECRET_KEY]).is_empty()
    }

    /// `orgId` is optional here; the token reconciler does not need it.
    pub fn from_secret_data(data: &SecretData) -> Result<Self, CredentialsError> {
        let absent = missing(data, &[CLIENT_ID_KEY, CLIENT_SECRET_KEY]);
        if !absent.is_empty() {
            return Err(CredentialsError::MissingFields(absent));
        }
        Ok(Self {
            org_id: data.get(ORG_ID_KEY).filter(|v| !v.is_empty()).cloned(),
            client_id: data[CLIENT_ID_KEY].clone(),
            client_secret: SecretString::from(data[CLIENT_SECRET_KEY].clone()),
        })
    }

    pub fn require_org_id(data: &SecretData) -> Result<(), CredentialsError> {
        let absent = missing(data, &SERVICE_ACCOUNT_FIELDS);
        if absent.is_empty() { Ok(()) } else { Err(CredentialsError::MissingFields(absent)) }
    }
}

impl std::fmt::Debug for ServiceAccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountCredentials")
            .field("org_id", &self.org_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Bearer token derived from service-account credentials.
pub struct AccessToken {
    pub token: SecretString,
    pub expiry: DateTime<Utc>,
}

impl AccessToken {
    pub fn from_secret_data(data: &SecretData) -> Result<Self, CredentialsError> {
        let absent = missing(data, &[ACCESS_TOKEN_KEY, EXPIRY_KEY]);
        if !absent.is_empty() {
            return Err(CredentialsError::MissingFields(absent));
        }
        let raw = &data[EXPIRY_KEY];
        let expiry = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| CredentialsError::InvalidExpiry { value: raw.clone(), message: e.to_string() })?
            .with_timezone(&Utc);
        Ok(Self { token: SecretString::from(data[ACCESS_TOKEN_KEY].clone()), expiry })
    }

    pub fn to_secret_data(&self) -> SecretData {
        let mut out = SecretData::new();
        out.insert(ACCESS_TOKEN_KEY.to_string(), self.token.expose_secret().to_string());
        out.insert(EXPIRY_KEY.to_string(), self.expiry.to_rfc3339());
        out
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken").field("expiry", &self.expiry).finish_non_exhaustive()
    }
}

/// How a reconcile authenticates against the external service.
#[derive(Debug)]
pub enum Auth {
    ApiKeys(Credentials),
    Bearer(AccessToken),
}

/// Resolved, ready-to-use authentication bundle for one reconcile.
#[derive(Debug)]
pub struct ConnectionConfig {
    pub org_id: String,
    pub auth: Auth,
}

impl ConnectionConfig {
    pub fn from_api_keys(credentials: Credentials) -> Self {
        Self { org_id: credentials.org_id.clone(), auth: Auth::ApiKeys(credentials) }
    }

    pub fn api_keys(&self) -> Option<&Credentials> {
        match &self.auth {
            Auth::ApiKeys(c) => Some(c),
            Auth::Bearer(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> SecretData {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn missing_fields_is_complement_of_present_subset() {
        for mask in 0u8..8 {
            let present: Vec<&str> = API_KEY_FIELDS.iter().enumerate().filter(|(i, _)| mask & (1 << i) != 0).map(|(_, k)| *k).collect();
            let d: SecretData = present.iter().map(|k| (k.to_string(), "v".to_string())).collect();
            let expected: Vec<&str> = API_KEY_FIELDS.iter().copied().filter(|k| !present.contains(k)).collect();
            assert_eq!(missing_api_key_fields(&d), expected, "mask={mask:03b}");
            assert_eq!(Credentials::from_secret_data(&d).is_ok(), expected.is_empty());
        }
    }

    #[test]
    fn empty_values_count_as_missing() {
        let d = data(&[("orgId", "o"), ("publicApiKey", ""), ("privateApiKey", "k")]);
        let err = Credentials::from_secret_data(&d).unwrap_err();
        assert_eq!(err, CredentialsError::MissingFields(vec!["publicApiKey"]));
        assert_eq!(err.to_string(), "the following fields are missing in the secret: publicApiKey");
    }

    #[test]
    fn debug_redacts_private_key() {
        let d = data(&[("orgId", "o"), ("publicApiKey", "pub"), ("privateApiKey", "hunter2")]);
        let c = Credentials::from_secret_data(&d).unwrap();
        assert!(!format!("{c:?}").contains("hunter2"));
        assert_eq!(c.private_key.expose_secret(), "hunter2");
    }

    #[test]
    fn access_token_parses_rfc3339_expiry() {
        let d = data(&[("accessToken", "tok"), ("expiry", "2030-01-02T03:04:05Z")]);
        let t = AccessToken::from_secret_data(&d).unwrap();
        assert_eq!(t.expiry.to_rfc3339(), "2030-01-02T03:04:05+00:00");
        let bad = data(&[("accessToken", "tok"), ("expiry", "tomorrow")]);
        assert!(matches!(AccessToken::from_secret_data(&bad), Err(CredentialsError::InvalidExpiry { .. })));
    }

    #[test]
    fn service_account_detection() {
        assert!(ServiceAccountCredentials::is_service_account(&data(&[("clientId", "a"), ("clientSecret", "b")])));
        assert!(!ServiceAccountCredentials::is_service_account(&data(&[("clientId", "a")])));
    }
}
