//! Encrypted file vault.
//!
//! Layout on disk:
//! - key file: base64 of a random 32-byte master secret, mode 0600
//! - vault file: JSON envelope `{version, nonce, ciphertext}` where the
//!   ciphertext is the ChaCha20-Poly1305 encryption of a JSON map
//!
//! The vault key is derived from the master secret with HKDF-SHA256 so the
//! raw secret never touches the cipher.

use crate::{SecureStorage, StorageError, StorageResult, StorageWrite};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const VAULT_VERSION: u32 = 1;
const VAULT_KEY_INFO: &[u8] = b"recipe-session-credential-vault-v1";

/// Source of the vault master secret.
pub trait KeyProvider: Send + Sync {
    /// Return the master secret, generating and persisting one if none exists.
    fn load_or_create(&self) -> StorageResult<[u8; KEY_SIZE]>;

    /// Remove the master secret. A later `load_or_create` generates a new one.
    fn destroy(&self) -> StorageResult<()>;
}

/// Master secret stored base64-encoded in an owner-only file.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn generate(&self) -> StorageResult<[u8; KEY_SIZE]> {
        let mut secret = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut secret);
        write_private(&self.path, BASE64.encode(secret).as_bytes())?;
        debug!(path = %self.path.display(), "Generated new vault master key");
        Ok(secret)
    }
}

impl KeyProvider for FileKeyProvider {
    fn load_or_create(&self) -> StorageResult<[u8; KEY_SIZE]> {
        let encoded = match fs::read_to_string(&self.path) {
            Ok(encoded) => encoded,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.generate(),
            Err(e) => return Err(e.into()),
        };

        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| StorageError::Corrupted(format!("vault key is not base64: {}", e)))?;

        bytes.try_into().map_err(|bytes: Vec<u8>| {
            StorageError::Corrupted(format!(
                "vault key has wrong length: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })
    }

    fn destroy(&self) -> StorageResult<()> {
        remove_if_exists(&self.path)
    }
}

#[derive(Serialize, Deserialize)]
struct VaultEnvelope {
    version: u32,
    nonce: String,
    ciphertext: String,
}

/// [`SecureStorage`] backed by an encrypted vault file.
///
/// The decrypted map is cached after the first read; the cache only moves
/// forward once the new vault has been renamed into place.
pub struct EncryptedFileStorage {
    vault_path: PathBuf,
    keys: Box<dyn KeyProvider>,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl EncryptedFileStorage {
    pub fn new(vault_path: impl Into<PathBuf>, keys: Box<dyn KeyProvider>) -> Self {
        Self {
            vault_path: vault_path.into(),
            keys,
            cache: Mutex::new(None),
        }
    }

    /// Vault at `vault_path` keyed by a master secret in `key_path`.
    pub fn with_key_file(vault_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self::new(vault_path, Box::new(FileKeyProvider::new(key_path)))
    }

    fn vault_key(&self) -> StorageResult<[u8; KEY_SIZE]> {
        let secret = self.keys.load_or_create()?;
        let hkdf = Hkdf::<Sha256>::new(None, &secret);
        let mut okm = [0u8; KEY_SIZE];
        hkdf.expand(VAULT_KEY_INFO, &mut okm)
            .map_err(|e| StorageError::Encoding(format!("HKDF expand failed: {:?}", e)))?;
        Ok(okm)
    }

    fn read_vault(&self) -> StorageResult<HashMap<String, String>> {
        let raw = match fs::read(&self.vault_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        let envelope: VaultEnvelope = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Corrupted(format!("vault envelope unreadable: {}", e)))?;
        if envelope.version != VAULT_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported vault version {}",
                envelope.version
            )));
        }

        let nonce = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| StorageError::Corrupted(format!("vault nonce: {}", e)))?;
        if nonce.len() != NONCE_SIZE {
            return Err(StorageError::Corrupted(format!(
                "vault nonce has wrong length: {}",
                nonce.len()
            )));
        }
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| StorageError::Corrupted(format!("vault ciphertext: {}", e)))?;

        let key = self.vault_key()?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| StorageError::Corrupted("vault failed to decrypt".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| StorageError::Corrupted(format!("vault contents unreadable: {}", e)))
    }

    fn write_vault(&self, entries: &HashMap<String, String>) -> StorageResult<()> {
        let plaintext =
            serde_json::to_vec(entries).map_err(|e| StorageError::Encoding(e.to_string()))?;

        let key = self.vault_key()?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let envelope = VaultEnvelope {
            version: VAULT_VERSION,
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        };
        let bytes =
            serde_json::to_vec(&envelope).map_err(|e| StorageError::Encoding(e.to_string()))?;
        write_private(&self.vault_path, &bytes)
    }

    /// Run `mutate` against a copy of the current map and persist the result.
    fn update<R>(&self, mutate: impl FnOnce(&mut HashMap<String, String>) -> R) -> StorageResult<R> {
        let mut cache = self.cache.lock();
        let mut entries = match cache.as_ref() {
            Some(entries) => entries.clone(),
            None => self.read_vault()?,
        };
        let result = mutate(&mut entries);
        self.write_vault(&entries)?;
        *cache = Some(entries);
        Ok(result)
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut cache = self.cache.lock();
        if cache.is_none() {
            *cache = Some(self.read_vault()?);
        }
        Ok(cache.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.update(|entries| entries.remove(key).is_some())
    }

    fn apply(&self, batch: &[StorageWrite]) -> StorageResult<()> {
        self.update(|entries| {
            for write in batch {
                match write {
                    StorageWrite::Set { key, value } => {
                        entries.insert(key.clone(), value.clone());
                    }
                    StorageWrite::Delete { key } => {
                        entries.remove(key);
                    }
                }
            }
        })
    }

    fn reset(&self) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        remove_if_exists(&self.vault_path)?;
        self.keys.destroy()?;
        *cache = Some(HashMap::new());
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file with owner-only permissions, then
/// rename it over `path`.
fn write_private(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage_in(dir: &Path) -> EncryptedFileStorage {
        EncryptedFileStorage::with_key_file(dir.join("credentials.vault"), dir.join("credentials.key"))
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();

        let storage = storage_in(dir.path());
        storage.set("token", "abc").unwrap();
        drop(storage);

        let reopened = storage_in(dir.path());
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_vault_does_not_contain_plaintext() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path());
        storage.set("token", "very-secret-value").unwrap();

        let raw = fs::read_to_string(dir.path().join("credentials.vault")).unwrap();
        assert!(!raw.contains("very-secret-value"));
        assert!(!dir.path().join("credentials.vault.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path());
        storage.set("token", "abc").unwrap();

        for name in ["credentials.vault", "credentials.key"] {
            let mode = fs::metadata(dir.path().join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{} should be 0600", name);
        }
    }

    #[test]
    fn test_garbage_vault_is_corrupted() {
        let dir = tempdir().unwrap();
        storage_in(dir.path()).set("token", "abc").unwrap();
        fs::write(dir.path().join("credentials.vault"), b"not json").unwrap();

        let storage = storage_in(dir.path());
        assert!(matches!(storage.get("token"), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn test_foreign_key_is_corrupted() {
        let dir = tempdir().unwrap();
        storage_in(dir.path()).set("token", "abc").unwrap();

        // Replace the master secret with a different valid one.
        fs::write(dir.path().join("credentials.key"), BASE64.encode([7u8; KEY_SIZE])).unwrap();

        let storage = storage_in(dir.path());
        assert!(matches!(storage.get("token"), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn test_truncated_key_is_corrupted() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("credentials.key"), BASE64.encode([1u8; 5])).unwrap();

        let provider = FileKeyProvider::new(dir.path().join("credentials.key"));
        assert!(matches!(provider.load_or_create(), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn test_reset_starts_over() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path());
        storage.set("token", "abc").unwrap();

        storage.reset().unwrap();
        assert!(!dir.path().join("credentials.vault").exists());
        assert!(!dir.path().join("credentials.key").exists());
        assert_eq!(storage.get("token").unwrap(), None);

        storage.set("token", "def").unwrap();
        let reopened = storage_in(dir.path());
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("def"));
    }
}
