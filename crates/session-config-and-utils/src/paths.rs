//! File system paths for the session runtime.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Name of the base directory under the user's home.
const BASE_DIR_NAME: &str = ".recipe-session";
/// Encrypted credential vault filename.
const VAULT_FILE_NAME: &str = "credentials.vault";
/// Vault master key filename.
const KEY_FILE_NAME: &str = "credentials.key";

/// Resolves every file the session runtime reads or writes.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.recipe-session`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Base directory (~/.recipe-session).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Config file path (~/.recipe-session/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Encrypted credential vault (~/.recipe-session/credentials.vault).
    pub fn vault_file(&self) -> PathBuf {
        self.base_dir.join(VAULT_FILE_NAME)
    }

    /// Vault master key (~/.recipe-session/credentials.key).
    pub fn key_file(&self) -> PathBuf {
        self.base_dir.join(KEY_FILE_NAME)
    }

    /// Logs directory (~/.recipe-session/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// JSONL log file (~/.recipe-session/logs/session.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("session.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
