//! Single-flight access token refresh.
//!
//! At most one refresh runs at a time. The first caller starts it on a
//! spawned task; everyone arriving while it runs awaits the same shared
//! result. The slot is cleared as soon as the task finishes, so the next
//! caller after that starts a fresh attempt.

use crate::auth_fsm::{RefreshConfig, SessionMachineInput, SessionStateTracker};
use crate::{AuthBackend, AuthError, AuthResult, BackendAuthError};
use credential_storage::{CredentialStore, StorageError};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Outcome of one refresh, cloned to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    #[error("refresh token rejected: {0}")]
    Rejected(String),

    #[error("refresh failed: {0}")]
    Transient(String),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl From<RefreshFailure> for AuthError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Rejected(reason) => AuthError::AuthRejected(reason),
            RefreshFailure::Transient(reason) => AuthError::TransientNetwork(reason),
            RefreshFailure::NotLoggedIn => AuthError::NotLoggedIn,
            RefreshFailure::Storage(reason) => AuthError::Storage(StorageError::Platform(reason)),
        }
    }
}

pub type RefreshOutcome = Result<String, RefreshFailure>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

enum Joined {
    Current(String),
    Waiting(SharedRefresh),
}

struct InFlight {
    attempt: u64,
    result: SharedRefresh,
}

struct Inner {
    store: Arc<CredentialStore>,
    backend: Arc<dyn AuthBackend>,
    tracker: Arc<SessionStateTracker>,
    config: RefreshConfig,
    slot: Mutex<Option<InFlight>>,
    next_attempt: AtomicU64,
    backend_calls: AtomicU64,
}

/// Clears the slot when the refresh task ends, unless a newer attempt owns it.
struct ClearOnDrop {
    inner: Arc<Inner>,
    attempt: u64,
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        let mut slot = self.inner.slot.lock();
        if slot.as_ref().is_some_and(|f| f.attempt == self.attempt) {
            *slot = None;
        }
    }
}

/// Coordinates access token refreshes across concurrent callers.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<Inner>,
}

impl TokenRefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        backend: Arc<dyn AuthBackend>,
        tracker: Arc<SessionStateTracker>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                tracker,
                config,
                slot: Mutex::new(None),
                next_attempt: AtomicU64::new(1),
                backend_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a new access token, joining a refresh already in flight.
    ///
    /// Dropping the returned future does not cancel the refresh for other
    /// waiters.
    pub async fn refresh(&self) -> AuthResult<String> {
        self.refresh_replacing(None).await
    }

    /// Repair a session after the server rejected `rejected_token`.
    ///
    /// If the stored access token already differs, another caller refreshed in
    /// the meantime and that token is returned without contacting the backend.
    pub async fn refresh_after_rejection(&self, rejected_token: Option<&str>) -> AuthResult<String> {
        self.refresh_replacing(rejected_token).await
    }

    async fn refresh_replacing(&self, rejected_token: Option<&str>) -> AuthResult<String> {
        match self.join_or_start(rejected_token) {
            Joined::Current(token) => Ok(token),
            Joined::Waiting(result) => result.await.map_err(AuthError::from),
        }
    }

    /// Returns true while a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    /// Number of refresh calls made to the backend so far.
    pub fn backend_calls(&self) -> u64 {
        self.inner.backend_calls.load(Ordering::Relaxed)
    }

    fn join_or_start(&self, rejected_token: Option<&str>) -> Joined {
        let mut slot = self.inner.slot.lock();
        if let Some(in_flight) = slot.as_ref() {
            debug!(attempt = in_flight.attempt, "Joining refresh in flight");
            return Joined::Waiting(in_flight.result.clone());
        }

        // Checked under the slot lock so a refresh finishing in between is seen.
        if let Some(rejected) = rejected_token {
            if let Some(current) = self.inner.store.get_access() {
                if current != rejected {
                    debug!("Access token already replaced, reusing it");
                    return Joined::Current(current);
                }
            }
        }

        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        let guard = ClearOnDrop {
            inner: Arc::clone(&self.inner),
            attempt,
        };
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = guard;
            inner.run_refresh(attempt).await
        });

        let result = task
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(RefreshFailure::Transient(format!("refresh task failed: {}", e)))
                })
            })
            .boxed()
            .shared();

        *slot = Some(InFlight {
            attempt,
            result: result.clone(),
        });
        Joined::Waiting(result)
    }
}

impl Inner {
    async fn run_refresh(&self, attempt: u64) -> RefreshOutcome {
        let Some(refresh_token) = self.store.get_refresh() else {
            debug!(attempt, "No refresh token stored");
            return Err(RefreshFailure::NotLoggedIn);
        };

        self.tracker.try_transition(&SessionMachineInput::RefreshStarted);
        let mut last_error = String::new();

        for call in 0..self.config.max_attempts {
            self.backend_calls.fetch_add(1, Ordering::Relaxed);
            match self.backend.refresh_token(&refresh_token).await {
                Ok(refreshed) => {
                    return self.store_refreshed(
                        attempt,
                        &refresh_token,
                        &refreshed.access_token,
                        refreshed.refresh_token.as_deref(),
                    );
                }
                Err(BackendAuthError::Rejected(reason)) => {
                    warn!(attempt, reason = %reason, "Refresh token rejected, clearing session");
                    match self.store.clear_if_current(&refresh_token) {
                        Ok(true) => self.tracker.mark_logged_out(),
                        Ok(false) => debug!(attempt, "Session changed during refresh, not clearing"),
                        Err(e) => warn!(attempt, error = %e, "Failed to clear rejected session"),
                    }
                    return Err(RefreshFailure::Rejected(reason));
                }
                Err(BackendAuthError::Transient(reason)) => {
                    last_error = reason;
                    if call + 1 < self.config.max_attempts {
                        let delay = self.config.delay_for_attempt(call);
                        debug!(
                            attempt,
                            call = call + 1,
                            max_attempts = self.config.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Refresh failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(
            attempt,
            max_attempts = self.config.max_attempts,
            error = %last_error,
            "Refresh failed transiently, keeping session"
        );
        self.tracker.try_transition(&SessionMachineInput::RefreshDeferred);
        Err(RefreshFailure::Transient(last_error))
    }

    fn store_refreshed(
        &self,
        attempt: u64,
        refresh_token: &str,
        access_token: &str,
        rotated: Option<&str>,
    ) -> RefreshOutcome {
        match self
            .store
            .replace_access_if_current(refresh_token, access_token, rotated)
        {
            Ok(true) => {
                self.tracker.try_transition(&SessionMachineInput::RefreshSucceeded);
                info!(attempt, rotated = rotated.is_some(), "Access token refreshed");
                Ok(access_token.to_string())
            }
            Ok(false) => {
                debug!(attempt, "Session changed during refresh, discarding result");
                self.store.get_access().ok_or(RefreshFailure::NotLoggedIn)
            }
            Err(e) => {
                warn!(attempt, error = %e, "Failed to store refreshed token");
                self.tracker.try_transition(&SessionMachineInput::RefreshDeferred);
                Err(RefreshFailure::Storage(e.to_string()))
            }
        }
    }
}
