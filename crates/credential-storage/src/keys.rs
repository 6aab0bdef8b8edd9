//! Storage key constants.

/// Storage keys used by the session subsystem
pub struct StorageKeys;

impl StorageKeys {
    /// Short-lived bearer token attached to API requests
    pub const ACCESS_TOKEN: &'static str = "session_access_token";

    /// Long-lived token exchanged for new access tokens
    pub const REFRESH_TOKEN: &'static str = "session_refresh_token";
}
