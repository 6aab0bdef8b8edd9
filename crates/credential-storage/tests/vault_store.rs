use credential_storage::{CredentialStore, Credentials, EncryptedFileStorage};
use session_config_and_utils::Paths;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn open(paths: &Paths) -> CredentialStore {
    CredentialStore::open(paths)
}

#[test]
fn credentials_persist_across_restarts() {
    let dir = tempdir().unwrap();
    let paths = Paths::with_base_dir(dir.path().to_path_buf());

    open(&paths).save("a1", "r1").unwrap();

    let store = open(&paths);
    assert_eq!(store.get_access().as_deref(), Some("a1"));
    assert_eq!(store.get_refresh().as_deref(), Some("r1"));
}

#[test]
fn corrupted_vault_reads_as_logged_out_and_recovers() {
    let dir = tempdir().unwrap();
    let paths = Paths::with_base_dir(dir.path().to_path_buf());
    open(&paths).save("a1", "r1").unwrap();

    std::fs::write(paths.vault_file(), b"{\"version\":1,\"nonce\":\"AAAA\"").unwrap();

    let store = open(&paths);
    assert_eq!(store.credentials(), Credentials::default());
    assert!(!store.is_logged_in());

    store.save("a2", "r2").unwrap();
    let reopened = open(&paths);
    assert_eq!(reopened.get_refresh().as_deref(), Some("r2"));
}

#[test]
fn corrupted_key_file_reads_as_logged_out_and_recovers() {
    let dir = tempdir().unwrap();
    let paths = Paths::with_base_dir(dir.path().to_path_buf());
    open(&paths).save("a1", "r1").unwrap();

    std::fs::write(paths.key_file(), b"%%% definitely not base64 %%%").unwrap();

    let store = open(&paths);
    assert_eq!(store.get_access(), None);

    // Writing after the reset generates fresh key material.
    store.save("a2", "r2").unwrap();
    let reopened = CredentialStore::new(Box::new(EncryptedFileStorage::with_key_file(
        paths.vault_file(),
        paths.key_file(),
    )));
    assert_eq!(reopened.get_access().as_deref(), Some("a2"));
}

#[test]
fn concurrent_readers_never_see_half_written_pair() {
    let dir = tempdir().unwrap();
    let paths = Paths::with_base_dir(dir.path().to_path_buf());
    let store = Arc::new(open(&paths));
    store.save("a0", "r0").unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..50 {
                store.save(&format!("a{}", i), &format!("r{}", i)).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = store.credentials();
                    let access = snapshot.access_token.unwrap();
                    let refresh = snapshot.refresh_token.unwrap();
                    assert_eq!(access[1..], refresh[1..], "torn pair: {} / {}", access, refresh);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}
