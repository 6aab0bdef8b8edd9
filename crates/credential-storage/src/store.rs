//! High-level credential API.

use crate::{
    EncryptedFileStorage, SecureStorage, StorageError, StorageKeys, StorageResult, StorageWrite,
};
use parking_lot::RwLock;
use session_config_and_utils::Paths;
use tracing::{debug, warn};

/// Snapshot of both tokens, read under one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn is_logged_in(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Thread-safe access/refresh token storage.
///
/// Reads run concurrently with each other; writes are exclusive. When the
/// backend reports [`StorageError::Corrupted`] the storage is reset and the
/// store behaves as logged out.
pub struct CredentialStore {
    storage: RwLock<Box<dyn SecureStorage>>,
}

impl CredentialStore {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self {
            storage: RwLock::new(storage),
        }
    }

    /// Open the encrypted vault at the standard locations.
    pub fn open(paths: &Paths) -> Self {
        Self::new(Box::new(EncryptedFileStorage::with_key_file(
            paths.vault_file(),
            paths.key_file(),
        )))
    }

    /// Store a fresh token pair in one batch.
    pub fn save(&self, access_token: &str, refresh_token: &str) -> StorageResult<()> {
        self.write(&[
            StorageWrite::set(StorageKeys::ACCESS_TOKEN, access_token),
            StorageWrite::set(StorageKeys::REFRESH_TOKEN, refresh_token),
        ])
    }

    /// Replace only the access token.
    pub fn save_access(&self, access_token: &str) -> StorageResult<()> {
        self.write(&[StorageWrite::set(StorageKeys::ACCESS_TOKEN, access_token)])
    }

    pub fn get_access(&self) -> Option<String> {
        self.read(StorageKeys::ACCESS_TOKEN)
    }

    pub fn get_refresh(&self) -> Option<String> {
        self.read(StorageKeys::REFRESH_TOKEN)
    }

    pub fn is_logged_in(&self) -> bool {
        self.get_refresh().is_some()
    }

    /// Both tokens as one consistent snapshot.
    pub fn credentials(&self) -> Credentials {
        let storage = self.storage.read();
        let snapshot = (|| -> StorageResult<Credentials> {
            Ok(Credentials {
                access_token: storage.get(StorageKeys::ACCESS_TOKEN)?,
                refresh_token: storage.get(StorageKeys::REFRESH_TOKEN)?,
            })
        })();

        match snapshot {
            Ok(credentials) => credentials,
            Err(e) => {
                drop(storage);
                self.recover_read(e);
                Credentials::default()
            }
        }
    }

    /// Remove both tokens.
    pub fn clear(&self) -> StorageResult<()> {
        self.write(&[
            StorageWrite::delete(StorageKeys::ACCESS_TOKEN),
            StorageWrite::delete(StorageKeys::REFRESH_TOKEN),
        ])
    }

    /// Store a refreshed access token (and a rotated refresh token) only if the
    /// stored refresh token is still `expected_refresh`.
    ///
    /// Returns `false` when the session changed underneath the caller.
    pub fn replace_access_if_current(
        &self,
        expected_refresh: &str,
        access_token: &str,
        rotated_refresh: Option<&str>,
    ) -> StorageResult<bool> {
        let mut batch = vec![StorageWrite::set(StorageKeys::ACCESS_TOKEN, access_token)];
        if let Some(refresh) = rotated_refresh {
            batch.push(StorageWrite::set(StorageKeys::REFRESH_TOKEN, refresh));
        }
        self.write_if_current(expected_refresh, &batch)
    }

    /// Remove both tokens only if the stored refresh token is still
    /// `expected_refresh`.
    pub fn clear_if_current(&self, expected_refresh: &str) -> StorageResult<bool> {
        self.write_if_current(
            expected_refresh,
            &[
                StorageWrite::delete(StorageKeys::ACCESS_TOKEN),
                StorageWrite::delete(StorageKeys::REFRESH_TOKEN),
            ],
        )
    }

    fn read(&self, key: &str) -> Option<String> {
        let storage = self.storage.read();
        match storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                drop(storage);
                self.recover_read(e);
                None
            }
        }
    }

    fn recover_read(&self, error: StorageError) {
        match error {
            StorageError::Corrupted(_) => {
                // Another writer may have healed while the read lock was released.
                let storage = self.storage.write();
                if let Err(StorageError::Corrupted(reason)) = storage.get(StorageKeys::REFRESH_TOKEN) {
                    heal(&**storage, &reason);
                }
            }
            other => warn!(error = %other, "Credential read failed"),
        }
    }

    fn write(&self, batch: &[StorageWrite]) -> StorageResult<()> {
        let storage = self.storage.write();
        match storage.apply(batch) {
            Err(StorageError::Corrupted(reason)) => {
                heal(&**storage, &reason);
                storage.apply(batch)
            }
            other => other,
        }
    }

    fn write_if_current(&self, expected_refresh: &str, batch: &[StorageWrite]) -> StorageResult<bool> {
        let storage = self.storage.write();
        let current = match storage.get(StorageKeys::REFRESH_TOKEN) {
            Ok(current) => current,
            Err(StorageError::Corrupted(reason)) => {
                heal(&**storage, &reason);
                None
            }
            Err(e) => return Err(e),
        };

        if current.as_deref() != Some(expected_refresh) {
            debug!("Stored session changed, skipping conditional credential write");
            return Ok(false);
        }

        storage.apply(batch)?;
        Ok(true)
    }
}

fn heal(storage: &dyn SecureStorage, reason: &str) {
    warn!(reason, "Credential storage unreadable, resetting to logged out");
    if let Err(e) = storage.reset() {
        warn!(error = %e, "Failed to reset credential storage");
    }
}
