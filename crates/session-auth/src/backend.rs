//! Auth backend contract and its HTTP implementation.

use crate::AuthResult;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Email/password sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Account creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Tokens issued on login, registration or OAuth exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Result of a refresh. `refresh_token` is set when the backend rotates it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Backend failure, split by whether the session survives it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendAuthError {
    /// Credentials are invalid or revoked
    #[error("rejected: {0}")]
    Rejected(String),

    /// Timeout, connection failure or server error
    #[error("transient: {0}")]
    Transient(String),
}

/// Remote authority that issues and refreshes tokens.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenPair, BackendAuthError>;

    async fn register(&self, _account: &NewAccount) -> Result<TokenPair, BackendAuthError> {
        Err(BackendAuthError::Rejected(
            "registration is not supported".to_string(),
        ))
    }

    async fn exchange_oauth(
        &self,
        _provider: &str,
        _id_token: &str,
    ) -> Result<TokenPair, BackendAuthError> {
        Err(BackendAuthError::Rejected(
            "OAuth sign-in is not supported".to_string(),
        ))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedToken, BackendAuthError>;
}

/// Classify a non-success HTTP status.
///
/// 4xx means the request itself was refused, except 408 and 429 which are
/// worth retrying.
pub fn classify_status(status: StatusCode) -> BackendAuthError {
    let reason = format!("HTTP {}", status);
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        BackendAuthError::Rejected(reason)
    } else {
        BackendAuthError::Transient(reason)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OAuthRequest<'a> {
    provider: &'a str,
    id_token: &'a str,
}

/// JSON-over-HTTP auth backend under `{api_base_url}/auth/`.
pub struct HttpAuthBackend {
    client: Client,
    base_url: Url,
}

impl HttpAuthBackend {
    pub fn new(api_base_url: &str) -> AuthResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: Url::parse(api_base_url)?,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/auth/{}",
            self.base_url.as_str().trim_end_matches('/'),
            name
        )
    }

    async fn post<B, R>(&self, name: &str, body: &B) -> Result<R, BackendAuthError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(name);
        debug!(url = %url, "Auth backend request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendAuthError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, endpoint = name, "Auth backend refused request");
            return Err(classify_status(status));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| BackendAuthError::Transient(format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenPair, BackendAuthError> {
        self.post("login", credentials).await
    }

    async fn register(&self, account: &NewAccount) -> Result<TokenPair, BackendAuthError> {
        self.post("register", account).await
    }

    async fn exchange_oauth(
        &self,
        provider: &str,
        id_token: &str,
    ) -> Result<TokenPair, BackendAuthError> {
        self.post("oauth", &OAuthRequest { provider, id_token }).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedToken, BackendAuthError> {
        self.post("refresh", &RefreshRequest { refresh_token }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        for code in [400, 401, 403, 404, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(matches!(classify_status(status), BackendAuthError::Rejected(_)), "{}", code);
        }
        for code in [408, 429, 500, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(matches!(classify_status(status), BackendAuthError::Transient(_)), "{}", code);
        }
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let backend = HttpAuthBackend::new("https://api.recipes.example.com/v1/").unwrap();
        assert_eq!(
            backend.endpoint("refresh"),
            "https://api.recipes.example.com/v1/auth/refresh"
        );
    }

    #[test]
    fn test_refreshed_token_without_rotation() {
        let token: RefreshedToken = serde_json::from_str(r#"{"accessToken":"a2"}"#).unwrap();
        assert_eq!(token.access_token, "a2");
        assert_eq!(token.refresh_token, None);

        let rotated: RefreshedToken =
            serde_json::from_str(r#"{"accessToken":"a2","refreshToken":"r2"}"#).unwrap();
        assert_eq!(rotated.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn test_request_bodies_are_camel_case() {
        let body = serde_json::to_value(RefreshRequest { refresh_token: "r1" }).unwrap();
        assert_eq!(body, serde_json::json!({ "refreshToken": "r1" }));

        let body = serde_json::to_value(OAuthRequest {
            provider: "google",
            id_token: "id",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "provider": "google", "idToken": "id" }));
    }
}
