use crate::infrastructure::error::InfraError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Accessor for the current opaque bearer token.
///
/// `Ok(None)` means no credential has been captured yet.
pub trait TokenSource: Send + Sync {
    fn load_token(&self) -> Result<Option<String>, InfraError>;
}

/// Reads the token from a browser storage-state export
/// (`origins[].localStorage[]` entries, the value being a JSON blob with `access_token`).
#[derive(Debug, Clone)]
pub struct StorageStateTokenSource {
    path: PathBuf,
    origin: String,
    storage_key: String,
}

#[derive(Debug, Deserialize)]
struct StorageState {
    #[serde(default)]
    origins: Vec<OriginState>,
}

#[derive(Debug, Deserialize)]
struct OriginState {
    origin: String,
    #[serde(default, rename = "localStorage")]
    local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Deserialize)]
struct StorageEntry {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SessionAuthorization {
    access_token: Option<String>,
}

impl StorageStateTokenSource {
    pub fn new(
        path: impl AsRef<Path>,
        origin: impl Into<String>,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            origin: origin.into(),
            storage_key: storage_key.into(),
        }
    }

    fn extract(&self, raw: &str) -> Result<String, InfraError> {
        let state: StorageState = serde_json::from_str(raw).map_err(|error| {
            InfraError::Credential(format!("invalid storage state {}: {error}", self.path.display()))
        })?;
        let origin = state
            .origins
            .iter()
            .find(|entry| entry.origin == self.origin)
            .ok_or_else(|| {
                InfraError::Credential(format!("origin {} not found in storage state", self.origin))
            })?;
        let entry = origin
            .local_storage
            .iter()
            .find(|entry| entry.name == self.storage_key)
            .ok_or_else(|| {
                InfraError::Credential(format!("localStorage key '{}' not found", self.storage_key))
            })?;
        let authorization: SessionAuthorization =
            serde_json::from_str(&entry.value).map_err(|error| {
                InfraError::Credential(format!("failed to parse '{}': {error}", self.storage_key))
            })?;
        authorization
            .access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| InfraError::Credential("access_token is missing or empty".to_string()))
    }
}

impl TokenSource for StorageStateTokenSource {
    fn load_token(&self) -> Result<Option<String>, InfraError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(InfraError::Io(error)),
        };
        self.extract(&raw).map(Some)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenSource {
    token: Mutex<Option<String>>,
}

impl InMemoryTokenSource {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: Mutex::new(token.map(ToOwned::to_owned)),
        }
    }

    pub fn set_token(&self, token: Option<&str>) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = token.map(ToOwned::to_owned);
        Ok(())
    }
}

impl TokenSource for InMemoryTokenSource {
    fn load_token(&self) -> Result<Option<String>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }
}
