//! Authentication module for Google Drive accounts
//!
//! Implements the OAuth2 authorization code flow (with PKCE and a loopback
//! redirect) plus refresh and revocation, and keeps one credential session
//! per named account.

pub mod callback;
pub mod error;
pub mod oauth;
pub mod registry;
pub mod session;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

pub use callback::{CallbackListener, LoopbackAuthorizer};
pub use error::AuthError;
pub use oauth::{
    AuthorizationGrant, AuthorizationServer, InteractiveAuthorizer, OAuthClient,
    PendingAuthorization, TokenGrant,
};
pub use registry::SessionRegistry;
pub use session::{
    persisted_status, AuthBackend, AuthResult, CredentialSession, RevokeOutcome, SessionSettings,
    DEFAULT_INTERACTIVE_TIMEOUT,
};
pub use tokens::{Credential, CredentialStatus, FileTokenStore, StoreError, TokenStore};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOCATION_URL: &str = "https://oauth2.googleapis.com/revoke";

/// Scopes every Drive account is authorized for
pub const DRIVE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/drive.file",
    "https://www.googleapis.com/auth/drive.metadata",
    "https://www.googleapis.com/auth/drive.readonly",
];

/// OAuth2 client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub client_id: String,
    /// Installed-app secrets are not confidential, but Google still requires one
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub revocation_url: Option<String>,
    pub scopes: BTreeSet<String>,
}

/// Google client-secrets file, as downloaded from the cloud console
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: Option<String>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl AuthConfig {
    /// Config for a Google OAuth client with the Drive scopes
    pub fn google(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            revocation_url: Some(GOOGLE_REVOCATION_URL.to_string()),
            scopes: DRIVE_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Read a client-secrets JSON file (`installed` or `web` application type)
    pub fn from_client_secrets(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client secrets {}", path.display()))?;
        Self::parse_client_secrets(&content)
            .with_context(|| format!("Invalid client secrets file {}", path.display()))
    }

    fn parse_client_secrets(content: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(content)?;
        let Some(secrets) = file.installed.or(file.web) else {
            bail!("expected an 'installed' or 'web' section");
        };

        let mut config = Self::google(secrets.client_id, secrets.client_secret);
        if let Some(auth_uri) = secrets.auth_uri {
            config.auth_url = auth_uri;
        }
        if let Some(token_uri) = secrets.token_uri {
            config.token_url = token_uri;
        }
        Ok(config)
    }
}
