//! Credential storage for the session subsystem.
//!
//! Tokens are kept behind the [`SecureStorage`] trait:
//! - [`EncryptedFileStorage`]: ChaCha20-Poly1305 vault file whose key is derived
//!   from a master secret in a separate owner-only key file
//! - [`MemoryStorage`]: process-local map for tests and embedding hosts
//!
//! [`CredentialStore`] is the high-level API the auth crates use. It
//! serializes writers, applies token pairs as one batch and recovers from
//! unreadable storage by starting over empty.

mod keys;
mod memory;
mod store;
mod traits;
mod vault;

pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use store::{CredentialStore, Credentials};
pub use traits::{SecureStorage, StorageWrite};
pub use vault::{EncryptedFileStorage, FileKeyProvider, KeyProvider};

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Stored key material or vault contents cannot be read back
    #[error("Storage corrupted: {0}")]
    Corrupted(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
