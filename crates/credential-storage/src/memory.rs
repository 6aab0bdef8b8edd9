use crate::{SecureStorage, StorageResult, StorageWrite};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory storage. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }

    fn apply(&self, batch: &[StorageWrite]) -> StorageResult<()> {
        let mut data = self.data.lock();
        for write in batch {
            match write {
                StorageWrite::Set { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                StorageWrite::Delete { key } => {
                    data.remove(key);
                }
            }
        }
        Ok(())
    }

    fn reset(&self) -> StorageResult<()> {
        self.data.lock().clear();
        Ok(())
    }
}
