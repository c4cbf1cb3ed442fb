//! Credential records and their on-disk storage

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tokens with less than this many seconds left are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 300;

/// One account's authorization grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// `None` means the lifetime is unknown and the token is assumed invalid.
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

/// Where a persisted credential stands, judged without touching the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Absent,
    Valid { expiry: DateTime<Utc> },
    /// Expired or lacking scopes, but a refresh token is available.
    Refreshable,
    /// Expired with no refresh token; only a new consent can recover it.
    Dead,
    /// Unexpired but granted fewer scopes than required, with no refresh token.
    Insufficient { missing: Vec<String> },
}

/// Absolute expiry for a lifetime reported in seconds from now.
///
/// A lifetime too large to represent is treated as unknown.
pub(crate) fn expires_at(expires_in_secs: Option<u64>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(expires_in_secs?).ok()?;
    Utc::now().checked_add_signed(Duration::try_seconds(secs)?)
}

impl Credential {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: Option<u64>,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expiry: expires_at(expires_in_secs),
            scopes,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(exp) => Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= exp,
            None => true,
        }
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Required scopes this credential was not granted, in sorted order.
    pub fn missing_scopes(&self, required: &BTreeSet<String>) -> Vec<String> {
        required.difference(&self.scopes).cloned().collect()
    }

    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.scopes)
    }

    /// Usable as-is: unexpired and granted every required scope.
    pub fn is_valid_for(&self, required: &BTreeSet<String>) -> bool {
        !self.access_token.is_empty() && !self.is_expired() && self.covers(required)
    }

    pub fn status(&self, required: &BTreeSet<String>) -> CredentialStatus {
        if self.is_valid_for(required) {
            // is_valid_for implies an expiry is present
            if let Some(expiry) = self.expiry {
                return CredentialStatus::Valid { expiry };
            }
        }
        if self.is_refreshable() {
            return CredentialStatus::Refreshable;
        }
        if self.is_expired() {
            CredentialStatus::Dead
        } else {
            CredentialStatus::Insufficient {
                missing: self.missing_scopes(required),
            }
        }
    }
}

/// Failures reading or writing a persisted credential
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on token file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("token file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize credential: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persistence contract for credential records, addressed by path.
pub trait TokenStore: Send + Sync {
    /// A missing record is `Ok(None)`, never an error.
    fn load(&self, path: &Path) -> Result<Option<Credential>, StoreError>;
    fn save(&self, path: &Path, credential: &Credential) -> Result<(), StoreError>;
    /// Deleting a record that does not exist succeeds.
    fn delete(&self, path: &Path) -> Result<(), StoreError>;
}

/// JSON token files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTokenStore;

impl FileTokenStore {
    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, path: &Path) -> Result<Option<Credential>, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let credential = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(credential))
    }

    fn save(&self, path: &Path, credential: &Credential) -> Result<(), StoreError> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }

        let content = serde_json::to_string_pretty(credential).map_err(StoreError::Serialize)?;

        // The rename is the commit point; the target is never partially written.
        let tmp = Self::temp_path(path);
        fs::write(&tmp, content).map_err(|e| StoreError::io(&tmp, e))?;

        // Token files hold secrets
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&tmp, perms).map_err(|e| StoreError::io(&tmp, e))?;
        }

        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(path, e));
        }
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}
