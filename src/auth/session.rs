//! Per-account credential state machine
//!
//! A session moves between two states, empty and ready. `authenticate`
//! tries, in order, the cached token, a refresh, and finally the
//! interactive consent flow; `revoke` returns the session to empty.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::oauth::{AuthorizationServer, InteractiveAuthorizer};
use super::{AuthError, Credential, CredentialStatus, StoreError, TokenStore, DRIVE_SCOPES};
use crate::api::{ClientFactory, ClientHandle};
use crate::models::Profile;

/// Default bound on how long the consent flow may wait for the browser
pub const DEFAULT_INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// Collaborators shared by every session in a registry
#[derive(Clone)]
pub struct AuthBackend {
    pub store: Arc<dyn TokenStore>,
    pub server: Arc<dyn AuthorizationServer>,
    pub authorizer: Arc<dyn InteractiveAuthorizer>,
    pub clients: Arc<dyn ClientFactory>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Scopes a credential must carry to be usable
    pub scopes: BTreeSet<String>,
    pub interactive_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            scopes: DRIVE_SCOPES.iter().map(|s| s.to_string()).collect(),
            interactive_timeout: DEFAULT_INTERACTIVE_TIMEOUT,
        }
    }
}

/// How an `authenticate` call ended
#[derive(Debug)]
pub enum AuthResult {
    ReadyFromCache,
    Refreshed,
    ReauthorizedInteractively,
    Failed(AuthError),
}

impl AuthResult {
    pub fn is_ready(&self) -> bool {
        !matches!(self, AuthResult::Failed(_))
    }
}

/// Result of `revoke`. Local state is cleared in both cases.
#[derive(Debug)]
pub enum RevokeOutcome {
    Complete,
    Partial {
        remote: Option<AuthError>,
        store: Option<StoreError>,
    },
}

impl RevokeOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RevokeOutcome::Complete)
    }
}

/// One account's credential plus the client derived from it
pub struct CredentialSession {
    account: String,
    token_path: PathBuf,
    settings: SessionSettings,
    backend: AuthBackend,
    credential: Option<Credential>,
    /// Present only while `credential` is valid
    client: Option<ClientHandle>,
}

impl CredentialSession {
    pub fn new(
        account: impl Into<String>,
        token_path: impl Into<PathBuf>,
        settings: SessionSettings,
        backend: AuthBackend,
    ) -> Self {
        Self {
            account: account.into(),
            token_path: token_path.into(),
            settings,
            backend,
            credential: None,
            client: None,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_some()
    }

    pub async fn authenticate(&mut self) -> AuthResult {
        self.authenticate_with_cancel(&CancellationToken::new())
            .await
    }

    /// Authenticate; `cancel` aborts a pending interactive consent.
    pub async fn authenticate_with_cancel(&mut self, cancel: &CancellationToken) -> AuthResult {
        let result = self.run_authentication(cancel).await;

        match result {
            AuthResult::ReadyFromCache => {
                tracing::info!(account = %self.account, "Using cached token")
            }
            AuthResult::Refreshed => tracing::info!(account = %self.account, "Token refreshed"),
            AuthResult::ReauthorizedInteractively => {
                tracing::info!(account = %self.account, "Authorized interactively")
            }
            AuthResult::Failed(ref e) => {
                tracing::error!(account = %self.account, "Authentication failed: {}", e)
            }
        }
        result
    }

    async fn run_authentication(&mut self, cancel: &CancellationToken) -> AuthResult {
        let cached = match self.backend.store.load(&self.token_path) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(account = %self.account, "Ignoring unreadable token file: {}", e);
                None
            }
        };

        if let Some(mut credential) = cached {
            if credential.is_valid_for(&self.settings.scopes) {
                self.install(credential);
                return AuthResult::ReadyFromCache;
            }

            if !credential.covers(&self.settings.scopes) {
                tracing::info!(
                    account = %self.account,
                    missing = ?credential.missing_scopes(&self.settings.scopes),
                    "Cached token lacks required scopes"
                );
            }

            match credential.refresh_token.clone() {
                Some(refresh_token) => {
                    match self.refresh(&mut credential, &refresh_token).await {
                        Ok(()) => {
                            self.persist(&credential);
                            self.install(credential);
                            return AuthResult::Refreshed;
                        }
                        Err(e) => tracing::warn!(
                            account = %self.account,
                            "Refresh failed, falling back to interactive authorization: {}",
                            e
                        ),
                    }
                }
                None => tracing::info!(
                    account = %self.account,
                    "No refresh token, authorizing interactively"
                ),
            }
        }

        match self.authorize_interactively(cancel).await {
            Ok(credential) => {
                self.persist(&credential);
                self.install(credential);
                AuthResult::ReauthorizedInteractively
            }
            Err(e) => {
                self.clear();
                AuthResult::Failed(e)
            }
        }
    }

    /// Exchange the refresh token and update `credential` in place on success.
    async fn refresh(
        &self,
        credential: &mut Credential,
        refresh_token: &str,
    ) -> Result<(), AuthError> {
        tracing::debug!(account = %self.account, "Refreshing access token...");
        let grant = self.backend.server.refresh(refresh_token).await?;

        let mut refreshed = credential.clone();
        grant.refresh_into(&mut refreshed);
        if !refreshed.covers(&self.settings.scopes) {
            return Err(AuthError::ScopeMismatch {
                missing: refreshed.missing_scopes(&self.settings.scopes),
            });
        }
        *credential = refreshed;
        Ok(())
    }

    async fn authorize_interactively(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Credential, AuthError> {
        let scopes = &self.settings.scopes;
        let grant = self
            .backend
            .authorizer
            .authorize(scopes, self.settings.interactive_timeout, cancel)
            .await?;
        let tokens = self.backend.server.exchange_code(&grant).await?;

        let credential = tokens.into_credential(scopes);
        if !credential.covers(scopes) {
            return Err(AuthError::ScopeMismatch {
                missing: credential.missing_scopes(scopes),
            });
        }
        Ok(credential)
    }

    /// Save failures leave the in-memory credential usable; they are only logged.
    fn persist(&self, credential: &Credential) {
        if let Err(e) = self.backend.store.save(&self.token_path, credential) {
            tracing::warn!(account = %self.account, "Failed to save token: {}", e);
        }
    }

    fn install(&mut self, credential: Credential) {
        self.client = Some(self.backend.clients.build_client(&credential));
        self.credential = Some(credential);
    }

    fn clear(&mut self) {
        self.credential = None;
        self.client = None;
    }

    /// The authenticated client, or `NotAuthenticated` before a successful `authenticate`.
    pub fn get_client(&self) -> Result<ClientHandle, AuthError> {
        self.client
            .clone()
            .ok_or_else(|| AuthError::NotAuthenticated(self.account.clone()))
    }

    /// Best-effort identity lookup; any failure yields `None`.
    pub async fn get_account_info(&self) -> Option<Profile> {
        let client = self.client.as_ref()?;
        match client.get_identity().await {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(account = %self.account, "Failed to fetch account info: {}", e);
                None
            }
        }
    }

    /// Revoke remotely (best-effort), then drop the credential and its persisted record.
    pub async fn revoke(&mut self) -> RevokeOutcome {
        // Fall back to the persisted record so a fresh process can still revoke the grant.
        let credential = match self.credential.take() {
            Some(credential) => Some(credential),
            None => self.backend.store.load(&self.token_path).ok().flatten(),
        };
        self.clear();

        let remote = match credential {
            Some(ref credential) => self.backend.server.revoke(credential).await.err(),
            None => None,
        };
        if let Some(ref e) = remote {
            tracing::warn!(account = %self.account, "Remote revocation failed: {}", e);
        }

        let store = self.backend.store.delete(&self.token_path).err();
        if let Some(ref e) = store {
            tracing::warn!(account = %self.account, "Failed to delete token file: {}", e);
        }

        tracing::info!(account = %self.account, "Credentials revoked");
        if remote.is_none() && store.is_none() {
            RevokeOutcome::Complete
        } else {
            RevokeOutcome::Partial { remote, store }
        }
    }

    /// Classify the persisted record without any network call.
    pub fn status(&self) -> Result<CredentialStatus, StoreError> {
        persisted_status(
            self.backend.store.as_ref(),
            &self.token_path,
            &self.settings.scopes,
        )
    }
}

/// Status of the record at `path`; needs only a store, no OAuth client.
pub fn persisted_status(
    store: &dyn TokenStore,
    path: &Path,
    scopes: &BTreeSet<String>,
) -> Result<CredentialStatus, StoreError> {
    Ok(match store.load(path)? {
        Some(credential) => credential.status(scopes),
        None => CredentialStatus::Absent,
    })
}
