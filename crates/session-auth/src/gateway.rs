//! Authenticated business requests.

use crate::{AuthError, AuthResult, TokenRefreshCoordinator};
use async_trait::async_trait;
use credential_storage::CredentialStore;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const AUTHORIZATION: &str = "Authorization";
const UNAUTHORIZED: u16 = 401;

/// Outbound request template. The gateway never mutates it; each dispatch
/// works on a copy with the current bearer token attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize>(mut self, body: &T) -> AuthResult<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self.header("Content-Type", "application/json"))
    }

    /// Value of the first header named `name`, ignoring case.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn with_bearer(&self, token: Option<&str>) -> ApiRequest {
        let mut request = self.clone();
        request
            .headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(AUTHORIZATION));
        if let Some(token) = token {
            request
                .headers
                .push((AUTHORIZATION.to_string(), format!("Bearer {}", token)));
        }
        request
    }
}

/// Response handed back to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> AuthResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends one request over the network.
#[async_trait]
pub trait HttpDispatcher: Send + Sync {
    async fn dispatch(&self, request: ApiRequest) -> AuthResult<ApiResponse>;
}

/// reqwest-backed dispatcher. Transport failures map to `TransientNetwork`.
pub struct ReqwestDispatcher {
    client: Client,
}

impl ReqwestDispatcher {
    pub fn new() -> AuthResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpDispatcher for ReqwestDispatcher {
    async fn dispatch(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::TransientNetwork(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TransientNetwork(e.to_string()))?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Attaches the session's access token to business requests and repairs the
/// session once when the server answers 401.
#[derive(Clone)]
pub struct AuthGateway {
    store: Arc<CredentialStore>,
    refresher: TokenRefreshCoordinator,
    dispatcher: Arc<dyn HttpDispatcher>,
}

impl AuthGateway {
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: TokenRefreshCoordinator,
        dispatcher: Arc<dyn HttpDispatcher>,
    ) -> Self {
        Self {
            store,
            refresher,
            dispatcher,
        }
    }

    /// Dispatch `request` with the current access token.
    ///
    /// On 401 the token is refreshed and the request sent once more; a second
    /// 401 yields [`AuthError::AuthenticationRequired`]. Non-401 responses are
    /// returned as-is whatever their status.
    ///
    /// When the refresh itself fails:
    /// - rejected: [`AuthError::AuthRejected`], credentials already cleared;
    /// - transient: the original 401 response, credentials kept for a later
    ///   attempt;
    /// - logged out meanwhile: [`AuthError::NotLoggedIn`].
    ///
    /// A transient failure of the refresh that runs before the first dispatch
    /// (no access token stored) has no response to return and surfaces
    /// [`AuthError::TransientNetwork`].
    pub async fn execute(&self, request: &ApiRequest) -> AuthResult<ApiResponse> {
        let credentials = self.store.credentials();
        let (token, repaired) = match (credentials.access_token, credentials.refresh_token) {
            (Some(access), _) => (Some(access), false),
            (None, Some(_)) => {
                debug!("No access token stored, refreshing before dispatch");
                (Some(self.refresher.refresh().await?), true)
            }
            (None, None) => (None, false),
        };

        let response = self
            .dispatcher
            .dispatch(request.with_bearer(token.as_deref()))
            .await?;
        if response.status != UNAUTHORIZED {
            return Ok(response);
        }

        if token.is_none() || repaired {
            warn!(url = %request.url, "Request unauthorized without a repairable session");
            return Err(AuthError::AuthenticationRequired);
        }

        debug!(url = %request.url, "Request unauthorized, refreshing access token");
        let fresh = match self
            .refresher
            .refresh_after_rejection(token.as_deref())
            .await
        {
            Ok(fresh) => fresh,
            Err(e) if e.is_transient() => {
                warn!(
                    url = %request.url,
                    error = %e,
                    "Token refresh deferred, returning unauthorized response"
                );
                return Ok(response);
            }
            Err(e) => return Err(e),
        };

        let retried = self
            .dispatcher
            .dispatch(request.with_bearer(Some(&fresh)))
            .await?;
        if retried.status == UNAUTHORIZED {
            warn!(url = %request.url, "Request unauthorized after refresh");
            return Err(AuthError::AuthenticationRequired);
        }
        Ok(retried)
    }

    /// Stored access token, without contacting the backend.
    pub fn current_access_token(&self) -> Option<String> {
        self.store.get_access()
    }

    /// Access token for a connection handshake: the stored one, or a freshly
    /// refreshed one when only a refresh token is stored. `None` when logged out.
    pub async fn access_token(&self) -> AuthResult<Option<String>> {
        let credentials = self.store.credentials();
        match (credentials.access_token, credentials.refresh_token) {
            (Some(access), _) => Ok(Some(access)),
            (None, Some(_)) => self.refresher.refresh().await.map(Some),
            (None, None) => Ok(None),
        }
    }

    pub fn refresher(&self) -> &TokenRefreshCoordinator {
        &self.refresher
    }
}
