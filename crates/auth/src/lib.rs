use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use http::header;
use serde::Deserialize;

/// A verified caller, as resolved by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: String,
    pub contact: Option<String>,
    pub display_name: Option<String>,
}

/// Codes: `ERR_AUTH_REQUIRED` (no credential), `ERR_AUTH_INVALID` (malformed or
/// rejected), `ERR_AUTH_TIMEOUT` (lookup timed out), `ERR_AUTH_UNAVAILABLE`
/// (provider unreachable or answered garbage), `ERR_INVALID_CONFIG`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn lookup(&self, token: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Clone)]
pub struct IdentityLookupConfig {
    pub lookup_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Resolves ID tokens through an Identity Toolkit style `accounts:lookup` endpoint.
#[derive(Clone)]
pub struct IdentityToolkitClient {
    config: IdentityLookupConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    #[serde(default)]
    local_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl IdentityToolkitClient {
    pub fn new(config: IdentityLookupConfig) -> Result<Self, AuthError> {
        if config.lookup_url.trim().is_empty() {
            return Err(AuthError::new(
                "ERR_INVALID_CONFIG",
                "identity lookup url must be non-empty",
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| {
                AuthError::new("ERR_INVALID_CONFIG", "failed to initialize identity http client")
            })?;

        Ok(Self { config, http })
    }
}

#[async_trait]
impl IdentityProvider for IdentityToolkitClient {
    async fn lookup(&self, token: &str) -> Result<Identity, AuthError> {
        let mut request = self
            .http
            .post(&self.config.lookup_url)
            .json(&serde_json::json!({ "idToken": token }));
        if let Some(api_key) = self.config.api_key.as_deref() {
            request = request.query(&[("key", api_key)]);
        }

        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::new(
                "ERR_AUTH_INVALID",
                "identity provider rejected the credential",
            ));
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "identity lookup returned non-success status");
            return Err(AuthError::new(
                "ERR_AUTH_UNAVAILABLE",
                format!("identity provider returned status {}", status.as_u16()),
            ));
        }

        let body = response.json::<LookupResponse>().await.map_err(|err| {
            if err.is_timeout() {
                transport_error(err)
            } else {
                AuthError::new(
                    "ERR_AUTH_UNAVAILABLE",
                    "identity provider returned invalid JSON",
                )
            }
        })?;

        let user = body.users.into_iter().next().ok_or_else(|| {
            AuthError::new("ERR_AUTH_INVALID", "credential did not resolve to a user")
        })?;

        let subject_id = non_empty(user.local_id).ok_or_else(|| {
            AuthError::new("ERR_AUTH_INVALID", "resolved user has no subject identifier")
        })?;

        Ok(Identity {
            subject_id,
            contact: non_empty(user.email),
            display_name: non_empty(user.display_name),
        })
    }
}

fn transport_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::new("ERR_AUTH_TIMEOUT", "identity lookup timed out")
    } else {
        AuthError::new("ERR_AUTH_UNAVAILABLE", "identity provider unreachable")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Verifies the bearer credential of every owner-scoped request. Nothing is cached:
/// each call goes back to the identity provider.
#[derive(Clone)]
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
}

impl Authenticator {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;
        self.provider.lookup(&token).await
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::new("ERR_AUTH_REQUIRED", "missing Authorization header"))?;

    let (scheme, token) = authz.split_once(' ').ok_or_else(|| {
        AuthError::new("ERR_AUTH_INVALID", "Authorization must be `Bearer <token>`")
    })?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::new(
            "ERR_AUTH_INVALID",
            "Authorization must be a Bearer token",
        ));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::new("ERR_AUTH_INVALID", "Bearer token is empty"));
    }

    Ok(token.to_string())
}
