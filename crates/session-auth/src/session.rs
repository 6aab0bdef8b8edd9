//! Session lifecycle: restore, sign-in flows and logout.

use crate::auth_fsm::{SessionMachineInput, SessionState, SessionStateTracker};
use crate::{AuthBackend, AuthError, AuthResult, BackendAuthError, LoginCredentials, NewAccount, TokenPair};
use credential_storage::CredentialStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Owns sign-in and sign-out. Token refresh lives in
/// [`TokenRefreshCoordinator`](crate::TokenRefreshCoordinator), which shares
/// the same store and state tracker.
pub struct SessionManager {
    store: Arc<CredentialStore>,
    backend: Arc<dyn AuthBackend>,
    tracker: Arc<SessionStateTracker>,
}

impl SessionManager {
    pub fn new(
        store: Arc<CredentialStore>,
        backend: Arc<dyn AuthBackend>,
        tracker: Arc<SessionStateTracker>,
    ) -> Self {
        Self {
            store,
            backend,
            tracker,
        }
    }

    /// Derive the initial state from storage. A stored refresh token means
    /// the user is still signed in.
    pub fn restore(&self) -> SessionState {
        if self.tracker.state() == SessionState::NotLoggedIn && self.store.is_logged_in() {
            self.tracker
                .try_transition(&SessionMachineInput::SessionRestored);
            info!("Restored stored session");
        }
        self.tracker.state()
    }

    /// Sign in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<()> {
        let credentials = LoginCredentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let backend = Arc::clone(&self.backend);
        self.sign_in("password", async move { backend.login(&credentials).await })
            .await
    }

    /// Create an account and sign in with it.
    pub async fn register(&self, account: NewAccount) -> AuthResult<()> {
        let backend = Arc::clone(&self.backend);
        self.sign_in("register", async move { backend.register(&account).await })
            .await
    }

    /// Exchange an identity provider token for a session.
    pub async fn exchange_oauth(&self, provider: &str, id_token: &str) -> AuthResult<()> {
        let backend = Arc::clone(&self.backend);
        let provider_name = provider.to_string();
        let id_token = id_token.to_string();
        self.sign_in("oauth", async move {
            backend.exchange_oauth(&provider_name, &id_token).await
        })
        .await
    }

    /// Clear stored credentials.
    pub fn logout(&self) -> AuthResult<()> {
        // Clearing storage takes priority over the FSM accepting the request.
        let _ = self.tracker.transition(&SessionMachineInput::LogoutRequested);

        let cleared = self.store.clear();
        self.tracker.mark_logged_out();
        cleared?;

        info!("Logged out");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.tracker.state()
    }

    /// Receiver that observes every session state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.tracker.subscribe()
    }

    pub fn is_logged_in(&self) -> bool {
        self.store.is_logged_in()
    }

    async fn sign_in<F>(&self, method: &'static str, request: F) -> AuthResult<()>
    where
        F: std::future::Future<Output = Result<TokenPair, BackendAuthError>>,
    {
        self.tracker.transition(&SessionMachineInput::LoginAttempt)?;

        let tokens = match request.await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(method, error = %e, "Sign-in failed");
                self.fail_login();
                return Err(match e {
                    BackendAuthError::Rejected(reason) => AuthError::InvalidCredentials(reason),
                    BackendAuthError::Transient(reason) => AuthError::TransientNetwork(reason),
                });
            }
        };

        if let Err(e) = self.store.save(&tokens.access_token, &tokens.refresh_token) {
            self.fail_login();
            return Err(e.into());
        }

        self.tracker.transition(&SessionMachineInput::LoginSuccess)?;
        info!(method, "Signed in");
        Ok(())
    }

    /// Return to the state matching what is stored after a failed sign-in.
    fn fail_login(&self) {
        self.tracker.try_transition(&SessionMachineInput::LoginFailed);
        if self.store.is_logged_in() {
            self.tracker
                .try_transition(&SessionMachineInput::SessionRestored);
        }
    }
}
