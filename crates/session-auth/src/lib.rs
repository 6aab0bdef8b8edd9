//! Authentication for the session subsystem.
//!
//! This crate provides:
//! - `AuthBackend` contract with a reqwest implementation
//! - FSM-based session state shared by every component
//! - Single-flight token refresh (`TokenRefreshCoordinator`)
//! - `AuthGateway`, which attaches tokens to business requests and repairs
//!   the session once on 401
//! - `SessionManager` for restore, sign-in and logout

mod auth_fsm;
mod backend;
mod error;
mod gateway;
mod refresh;
mod session;

pub use auth_fsm::session_machine;
pub use auth_fsm::{
    RefreshConfig, SessionMachine, SessionMachineInput, SessionMachineState, SessionState,
    SessionStateTracker,
};
pub use backend::{
    classify_status, AuthBackend, BackendAuthError, HttpAuthBackend, LoginCredentials, NewAccount,
    RefreshedToken, TokenPair,
};
pub use error::{AuthError, AuthResult};
pub use gateway::{ApiRequest, ApiResponse, AuthGateway, HttpDispatcher, ReqwestDispatcher};
pub use refresh::{RefreshFailure, RefreshOutcome, TokenRefreshCoordinator};
pub use session::SessionManager;
