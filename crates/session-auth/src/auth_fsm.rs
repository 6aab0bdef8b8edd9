//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐  SessionRestored
//! │   NotLoggedIn   │ ─────────────────────────────┐
//! └────────┬────────┘                              │
//!          │ LoginAttempt                          │
//!          ▼                                       │
//! ┌─────────────────┐  LoginFailed                 │
//! │    LoggingIn    │ ──────────► NotLoggedIn      │
//! └────────┬────────┘                              │
//!          │ LoginSuccess                          ▼
//!          ▼                              ┌─────────────────┐
//!     LoggedIn ◄──────────────────────────│    LoggedIn     │
//!          │ RefreshStarted               └─────────────────┘
//!          ▼
//! ┌─────────────────┐  RefreshSucceeded / RefreshDeferred ──► LoggedIn
//! │   Refreshing    │  RefreshRejected ──► NotLoggedIn
//! └────────┬────────┘
//!          │ LogoutRequested (also from LoggedIn)
//!          ▼
//! ┌─────────────────┐
//! │   LoggingOut    │ ── LogoutComplete ──► NotLoggedIn
//! └─────────────────┘
//! ```

use crate::{AuthError, AuthResult};
use parking_lot::Mutex;
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use session_config_and_utils::RefreshSettings;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(NotLoggedIn)

    NotLoggedIn => {
        SessionRestored => LoggedIn,
        LoginAttempt => LoggingIn
    },
    LoggingIn => {
        LoginSuccess => LoggedIn,
        LoginFailed => NotLoggedIn
    },
    LoggedIn => {
        LoginAttempt => LoggingIn,
        RefreshStarted => Refreshing,
        LogoutRequested => LoggingOut,
        SessionRevoked => NotLoggedIn
    },
    Refreshing => {
        RefreshSucceeded => LoggedIn,
        // Transient failure: credentials are kept
        RefreshDeferred => LoggedIn,
        RefreshRejected => NotLoggedIn,
        LogoutRequested => LoggingOut
    },
    LoggingOut => {
        LogoutComplete => NotLoggedIn
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state exposed to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotLoggedIn,
    LoggingIn,
    LoggedIn,
    Refreshing,
    LoggingOut,
}

impl SessionState {
    /// Returns true while a session is stored, including during a refresh.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::LoggedIn | SessionState::Refreshing)
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::NotLoggedIn => SessionState::NotLoggedIn,
            SessionMachineState::LoggingIn => SessionState::LoggingIn,
            SessionMachineState::LoggedIn => SessionState::LoggedIn,
            SessionMachineState::Refreshing => SessionState::Refreshing,
            SessionMachineState::LoggingOut => SessionState::LoggingOut,
        }
    }
}

/// Shared owner of the session FSM. Every transition is published to
/// watchers of [`subscribe`](Self::subscribe).
pub struct SessionStateTracker {
    machine: Mutex<SessionMachine>,
    tx: watch::Sender<SessionState>,
}

impl Default for SessionStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::NotLoggedIn);
        Self {
            machine: Mutex::new(SessionMachine::new()),
            tx,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.machine.lock().state())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Apply `input`, failing if the current state does not accept it.
    pub fn transition(&self, input: &SessionMachineInput) -> AuthResult<SessionState> {
        let mut machine = self.machine.lock();
        let old_state = SessionState::from(machine.state());

        machine.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                machine.state()
            ))
        })?;

        let new_state = SessionState::from(machine.state());
        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Session state transition"
            );
            self.tx.send_replace(new_state);
        }

        Ok(new_state)
    }

    /// Apply `input` if the current state accepts it; otherwise leave the
    /// state untouched.
    pub fn try_transition(&self, input: &SessionMachineInput) -> Option<SessionState> {
        match self.transition(input) {
            Ok(state) => Some(state),
            Err(e) => {
                debug!(error = %e, "Ignoring session transition");
                None
            }
        }
    }

    /// Drive the machine to `NotLoggedIn` from whichever logged-in state it is in.
    pub fn mark_logged_out(&self) {
        let state = self.state();
        let input = match state {
            SessionState::Refreshing => SessionMachineInput::RefreshRejected,
            SessionState::LoggedIn => SessionMachineInput::SessionRevoked,
            SessionState::LoggingIn => SessionMachineInput::LoginFailed,
            SessionState::LoggingOut => SessionMachineInput::LogoutComplete,
            SessionState::NotLoggedIn => return,
        };
        self.try_transition(&input);
    }
}

/// Configuration for retry behavior during token refresh.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Backend calls per refresh before a transient failure is reported.
    pub max_attempts: u32,
    /// Initial delay between attempts in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl From<&RefreshSettings> for RefreshConfig {
    fn from(settings: &RefreshSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay_ms: settings.initial_delay_ms,
            max_delay_ms: settings.max_delay_ms,
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
