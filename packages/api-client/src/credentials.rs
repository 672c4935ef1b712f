//! Where the bearer token lives between requests.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

/// Persistent token storage, the client-side counterpart of browser local
/// storage.
pub trait CredentialStore: Send + Sync {
    /// The stored token, if any.
    fn token(&self) -> Option<String>;

    fn save(&self, token: &str) -> Result<()>;

    /// Forget the stored token. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

/// Token kept in process memory only.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| ApiError::Credentials("credential lock poisoned".into()))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| ApiError::Credentials("credential lock poisoned".into()))?;
        *guard = None;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    token: String,
}

/// Token persisted as a small JSON file, e.g. `~/.config/kamu/credentials.json`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn token(&self) -> Option<String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read credentials");
                return None;
            }
        };
        match serde_json::from_str::<StoredCredentials>(&raw) {
            Ok(stored) => Some(stored.token),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring malformed credentials file");
                None
            }
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ApiError::Credentials(e.to_string()))?;
        }
        let body = serde_json::to_string(&StoredCredentials {
            token: token.to_string(),
        })
        .map_err(|e| ApiError::Credentials(e.to_string()))?;
        fs::write(&self.path, body).map_err(|e| ApiError::Credentials(e.to_string()))
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::Credentials(e.to_string())),
        }
    }
}
