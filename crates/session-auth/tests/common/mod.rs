#![allow(dead_code)]

use async_trait::async_trait;
use credential_storage::{CredentialStore, MemoryStorage, SecureStorage, StorageKeys};
use parking_lot::Mutex;
use session_auth::{
    ApiRequest, ApiResponse, AuthBackend, AuthResult, BackendAuthError, HttpDispatcher,
    LoginCredentials, RefreshConfig, RefreshedToken, SessionManager, SessionStateTracker,
    TokenPair, TokenRefreshCoordinator,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted auth backend. Refresh results are consumed in order; the last
/// one repeats once the script runs out.
pub struct FakeBackend {
    login_result: Mutex<Result<TokenPair, BackendAuthError>>,
    refresh_script: Mutex<VecDeque<Result<RefreshedToken, BackendAuthError>>>,
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
    seen_refresh_tokens: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            login_result: Mutex::new(Ok(pair("A1", "R1"))),
            refresh_script: Mutex::new(VecDeque::new()),
            refresh_delay: Duration::ZERO,
            refresh_calls: AtomicUsize::new(0),
            seen_refresh_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn on_login(self, result: Result<TokenPair, BackendAuthError>) -> Self {
        *self.login_result.lock() = result;
        self
    }

    pub fn then_refresh(self, result: Result<RefreshedToken, BackendAuthError>) -> Self {
        self.refresh_script.lock().push_back(result);
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.seen_refresh_tokens.lock().clone()
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn login(&self, _credentials: &LoginCredentials) -> Result<TokenPair, BackendAuthError> {
        self.login_result.lock().clone()
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedToken, BackendAuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_refresh_tokens.lock().push(refresh_token.to_string());
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }

        let mut script = self.refresh_script.lock();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.unwrap_or_else(|| Err(BackendAuthError::Transient("no script".to_string())))
    }
}

pub fn pair(access: &str, refresh: &str) -> TokenPair {
    TokenPair {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
    }
}

pub fn refreshed(access: &str) -> Result<RefreshedToken, BackendAuthError> {
    Ok(RefreshedToken {
        access_token: access.to_string(),
        refresh_token: None,
    })
}

pub fn rejected() -> Result<RefreshedToken, BackendAuthError> {
    Err(BackendAuthError::Rejected("HTTP 401 Unauthorized".to_string()))
}

pub fn transient() -> Result<RefreshedToken, BackendAuthError> {
    Err(BackendAuthError::Transient("HTTP 503 Service Unavailable".to_string()))
}

/// Dispatcher answering by bearer token: tokens listed as accepted get 200,
/// everything else 401.
pub struct FakeDispatcher {
    accepted: Mutex<Vec<String>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeDispatcher {
    pub fn accepting(tokens: &[&str]) -> Self {
        Self {
            accepted: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn bearer_tokens(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .iter()
            .map(|r| {
                r.header_value("Authorization")
                    .map(|v| v.trim_start_matches("Bearer ").to_string())
            })
            .collect()
    }
}

#[async_trait]
impl HttpDispatcher for FakeDispatcher {
    async fn dispatch(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let token = request
            .header_value("Authorization")
            .map(|v| v.trim_start_matches("Bearer ").to_string());
        self.requests.lock().push(request);

        let accepted = self.accepted.lock();
        let allowed = match token {
            Some(token) => accepted.contains(&token),
            None => accepted.iter().any(|t| t == "*"),
        };
        Ok(ApiResponse {
            status: if allowed { 200 } else { 401 },
            headers: Vec::new(),
            body: if allowed { r#"{"ok":true}"#.to_string() } else { String::new() },
        })
    }
}

/// Fully wired auth stack over in-memory storage.
pub struct Harness {
    pub store: Arc<CredentialStore>,
    pub backend: Arc<FakeBackend>,
    pub tracker: Arc<SessionStateTracker>,
    pub refresher: TokenRefreshCoordinator,
    pub session: SessionManager,
}

pub fn fast_retry() -> RefreshConfig {
    RefreshConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 4,
    }
}

pub fn harness(backend: FakeBackend) -> Harness {
    harness_with_storage(backend, MemoryStorage::new())
}

pub fn harness_with_storage(backend: FakeBackend, storage: MemoryStorage) -> Harness {
    let store = Arc::new(CredentialStore::new(Box::new(storage)));
    let backend = Arc::new(backend);
    let tracker = Arc::new(SessionStateTracker::new());
    let refresher = TokenRefreshCoordinator::new(
        Arc::clone(&store),
        backend.clone(),
        Arc::clone(&tracker),
        fast_retry(),
    );
    let session = SessionManager::new(Arc::clone(&store), backend.clone(), Arc::clone(&tracker));
    session.restore();
    Harness {
        store,
        backend,
        tracker,
        refresher,
        session,
    }
}

/// Storage holding only a refresh token, as after the access token expired
/// and was discarded.
pub fn refresh_only_storage(refresh: &str) -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage.set(StorageKeys::REFRESH_TOKEN, refresh).unwrap();
    storage
}
