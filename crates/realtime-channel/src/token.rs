use crate::{ChannelError, ChannelResult};
use async_trait::async_trait;
use session_auth::AuthGateway;

/// Supplies the bearer token for the connection handshake.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// `None` connects without credentials.
    async fn access_token(&self) -> ChannelResult<Option<String>>;
}

#[async_trait]
impl AccessTokenProvider for AuthGateway {
    async fn access_token(&self) -> ChannelResult<Option<String>> {
        AuthGateway::access_token(self)
            .await
            .map_err(|e| ChannelError::Connection(format!("no access token: {}", e)))
    }
}

/// Fixed token, for hosts that manage credentials themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> ChannelResult<Option<String>> {
        Ok(self.0.clone())
    }
}
