//! Configuration loading

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{AuthConfig, SessionSettings, DEFAULT_INTERACTIVE_TIMEOUT, DRIVE_SCOPES};

/// Account used when none are configured
pub const DEFAULT_ACCOUNT: &str = "default";

const DEFAULT_TOKEN_FILENAME: &str = "token.json";
const DEFAULT_CLIENT_SECRETS: &str = "credentials.json";

const ENV_CREDENTIALS_FILE: &str = "GOOGLE_CREDENTIALS_FILE";
const ENV_TOKEN_FILE: &str = "GOOGLE_TOKEN_FILE";

/// Application configuration
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub oauth: OAuthSettings,
    /// File name for token records, resolved against the working directory
    pub token_filename: String,
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OAuthSettings {
    /// Google client-secrets JSON; takes precedence over the inline client fields
    pub client_secrets_file: Option<PathBuf>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub revocation_url: Option<String>,
    /// Required scopes; defaults to the Drive scopes
    pub scopes: Vec<String>,
    /// Loopback port for the consent redirect (0 = any free port)
    pub redirect_port: u16,
    pub interactive_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountConfig {
    pub name: String,
    pub token_file: Option<PathBuf>,
    /// OAuth client for this account only; overrides `[oauth]` client settings
    #[serde(default)]
    pub client_secrets_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oauth: OAuthSettings::default(),
            token_filename: DEFAULT_TOKEN_FILENAME.to_string(),
            accounts: Vec::new(),
        }
    }
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_secrets_file: None,
            client_id: None,
            client_secret: None,
            auth_url: None,
            token_url: None,
            revocation_url: None,
            scopes: DRIVE_SCOPES.iter().map(|s| s.to_string()).collect(),
            redirect_port: 0,
            interactive_timeout_secs: DEFAULT_INTERACTIVE_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Get config file path
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "drive-auth", "drive-auth")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from disk, falling back to defaults when the file is absent
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(file) = var(ENV_CREDENTIALS_FILE) {
            self.oauth.client_secrets_file = Some(PathBuf::from(file));
        }
        if let Some(file) = var(ENV_TOKEN_FILE) {
            self.token_filename = file;
        }
    }

    /// Configured accounts, or the single default account
    pub fn accounts(&self) -> Vec<AccountConfig> {
        if self.accounts.is_empty() {
            vec![AccountConfig {
                name: DEFAULT_ACCOUNT.to_string(),
                token_file: None,
                client_secrets_file: None,
            }]
        } else {
            self.accounts.clone()
        }
    }

    /// Token file for an account, relative paths resolved against `base_dir`
    pub fn token_path(&self, account: &AccountConfig, base_dir: &Path) -> PathBuf {
        match account.token_file {
            Some(ref file) => base_dir.join(file),
            None if account.name == DEFAULT_ACCOUNT => base_dir.join(&self.token_filename),
            None => base_dir.join(format!(
                "{}_{}",
                sanitize_name(&account.name),
                self.token_filename
            )),
        }
    }

    /// OAuth client config: client-secrets file first, then inline settings
    pub fn auth_config(&self, base_dir: &Path) -> Result<AuthConfig> {
        let oauth = &self.oauth;

        let auth = match (&oauth.client_secrets_file, &oauth.client_id) {
            (Some(file), _) => AuthConfig::from_client_secrets(&base_dir.join(file))?,
            (None, Some(id)) => AuthConfig::google(id.clone(), oauth.client_secret.clone()),
            (None, None) => {
                AuthConfig::from_client_secrets(&base_dir.join(DEFAULT_CLIENT_SECRETS))
                    .context("No OAuth client configured (set oauth.client_id or provide credentials.json)")?
            }
        };
        Ok(self.with_overrides(auth))
    }

    /// The account's own OAuth client, if it names a client-secrets file
    pub fn account_auth_config(
        &self,
        account: &AccountConfig,
        base_dir: &Path,
    ) -> Result<Option<AuthConfig>> {
        let Some(ref file) = account.client_secrets_file else {
            return Ok(None);
        };
        let auth = AuthConfig::from_client_secrets(&base_dir.join(file))
            .with_context(|| format!("OAuth client for account '{}'", account.name))?;
        Ok(Some(self.with_overrides(auth)))
    }

    fn with_overrides(&self, mut auth: AuthConfig) -> AuthConfig {
        let oauth = &self.oauth;
        if let Some(ref url) = oauth.auth_url {
            auth.auth_url = url.clone();
        }
        if let Some(ref url) = oauth.token_url {
            auth.token_url = url.clone();
        }
        if oauth.revocation_url.is_some() {
            auth.revocation_url = oauth.revocation_url.clone();
        }
        auth.scopes = self.required_scopes();
        auth
    }

    /// Scopes every account must be granted
    pub fn required_scopes(&self) -> BTreeSet<String> {
        if self.oauth.scopes.is_empty() {
            DRIVE_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            self.oauth.scopes.iter().cloned().collect()
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            scopes: self.required_scopes(),
            interactive_timeout: Duration::from_secs(self.oauth.interactive_timeout_secs),
        }
    }
}

/// Make an account name safe to embed in a file name
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
