//! Storage trait definitions.

use crate::StorageResult;

/// One mutation inside a batch passed to [`SecureStorage::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageWrite {
    Set { key: String, value: String },
    Delete { key: String },
}

impl StorageWrite {
    pub fn set(key: &str, value: &str) -> Self {
        Self::Set {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn delete(key: &str) -> Self {
        Self::Delete {
            key: key.to_string(),
        }
    }
}

/// Trait for secure storage backends
pub trait SecureStorage: Send + Sync {
    /// Store a value securely
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply several writes. Backends that can persist them in one step
    /// override this; the default applies them in order.
    fn apply(&self, batch: &[StorageWrite]) -> StorageResult<()> {
        for write in batch {
            match write {
                StorageWrite::Set { key, value } => self.set(key, value)?,
                StorageWrite::Delete { key } => {
                    self.delete(key)?;
                }
            }
        }
        Ok(())
    }

    /// Discard everything, including key material, and start over empty.
    fn reset(&self) -> StorageResult<()>;
}
