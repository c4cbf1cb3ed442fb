//! Named credential sessions for several accounts

use futures::future::join_all;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::session::{AuthBackend, AuthResult, CredentialSession, RevokeOutcome, SessionSettings};
use super::{AuthError, CredentialStatus};
use crate::api::ClientHandle;
use crate::models::Profile;

/// Account name → session. Entries exist only through explicit registration.
pub struct SessionRegistry {
    backend: AuthBackend,
    settings: SessionSettings,
    sessions: HashMap<String, CredentialSession>,
}

impl SessionRegistry {
    pub fn new(backend: AuthBackend, settings: SessionSettings) -> Self {
        Self {
            backend,
            settings,
            sessions: HashMap::new(),
        }
    }

    fn new_session(
        &self,
        account: &str,
        token_path: PathBuf,
        backend: AuthBackend,
    ) -> CredentialSession {
        CredentialSession::new(account, token_path, self.settings.clone(), backend)
    }

    /// A token file belongs to at most one account.
    fn check_token_path(&self, account: &str, token_path: &Path) -> Result<(), AuthError> {
        let wanted = normalize(token_path);
        match self
            .sessions
            .values()
            .find(|s| s.account() != account && normalize(s.token_path()) == wanted)
        {
            Some(owner) => Err(AuthError::TokenPathInUse {
                path: token_path.to_path_buf(),
                account: owner.account().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Register a new account. Fails if the name or token file is taken; see `replace`.
    pub fn register(
        &mut self,
        account: &str,
        token_path: impl Into<PathBuf>,
    ) -> Result<&mut CredentialSession, AuthError> {
        let backend = self.backend.clone();
        self.register_with_backend(account, token_path, backend)
    }

    /// Register an account that talks to its own OAuth client instead of the shared one.
    pub fn register_with_backend(
        &mut self,
        account: &str,
        token_path: impl Into<PathBuf>,
        backend: AuthBackend,
    ) -> Result<&mut CredentialSession, AuthError> {
        let token_path = token_path.into();
        self.check_token_path(account, &token_path)?;

        let session = self.new_session(account, token_path, backend);
        match self.sessions.entry(account.to_string()) {
            Entry::Occupied(_) => Err(AuthError::DuplicateAccount(account.to_string())),
            Entry::Vacant(slot) => {
                tracing::debug!(account, "Registered account");
                Ok(slot.insert(session))
            }
        }
    }

    /// Register an account, discarding any existing session under that name.
    pub fn replace(
        &mut self,
        account: &str,
        token_path: impl Into<PathBuf>,
    ) -> Result<&mut CredentialSession, AuthError> {
        let token_path = token_path.into();
        self.check_token_path(account, &token_path)?;

        let session = self.new_session(account, token_path, self.backend.clone());
        Ok(match self.sessions.entry(account.to_string()) {
            Entry::Occupied(mut slot) => {
                tracing::info!(account, "Replacing registered account");
                slot.insert(session);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(session),
        })
    }

    pub fn remove(&mut self, account: &str) -> Option<CredentialSession> {
        self.sessions.remove(account)
    }

    pub fn session(&self, account: &str) -> Result<&CredentialSession, AuthError> {
        self.sessions
            .get(account)
            .ok_or_else(|| AuthError::UnknownAccount(account.to_string()))
    }

    fn session_mut(&mut self, account: &str) -> Result<&mut CredentialSession, AuthError> {
        self.sessions
            .get_mut(account)
            .ok_or_else(|| AuthError::UnknownAccount(account.to_string()))
    }

    /// Registered account names, sorted
    pub fn accounts(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sessions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn authenticate(&mut self, account: &str) -> Result<AuthResult, AuthError> {
        Ok(self.session_mut(account)?.authenticate().await)
    }

    pub async fn authenticate_with_cancel(
        &mut self,
        account: &str,
        cancel: &CancellationToken,
    ) -> Result<AuthResult, AuthError> {
        Ok(self
            .session_mut(account)?
            .authenticate_with_cancel(cancel)
            .await)
    }

    pub fn get_client(&self, account: &str) -> Result<ClientHandle, AuthError> {
        self.session(account)?.get_client()
    }

    pub async fn account_info(&self, account: &str) -> Result<Option<Profile>, AuthError> {
        Ok(self.session(account)?.get_account_info().await)
    }

    pub async fn revoke(&mut self, account: &str) -> Result<RevokeOutcome, AuthError> {
        Ok(self.session_mut(account)?.revoke().await)
    }

    /// Persisted credential status; store errors are reported per account.
    pub fn status(&self, account: &str) -> Result<CredentialStatus, AuthError> {
        Ok(self.session(account)?.status()?)
    }

    /// Profiles of every authenticated account whose identity lookup succeeds.
    pub async fn snapshot_authenticated(&self) -> BTreeMap<String, Profile> {
        let lookups = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_authenticated())
            .map(|(name, session)| async move {
                session
                    .get_account_info()
                    .await
                    .map(|profile| (name.clone(), profile))
            });

        join_all(lookups).await.into_iter().flatten().collect()
    }
}

/// Lexical normalization; `a/./b.json` and `a/b.json` name the same file.
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::*;
    use crate::auth::{FileTokenStore, TokenStore};
    use std::sync::atomic::Ordering;

    fn registry(h: &Harness) -> SessionRegistry {
        SessionRegistry::new(h.backend.clone(), settings())
    }

    #[test]
    fn test_register_duplicate_is_error() {
        let h = Harness::new();
        let mut reg = registry(&h);
        reg.register("work", h.path("work.json")).unwrap();

        assert!(matches!(
            reg.register("work", h.path("other.json")),
            Err(AuthError::DuplicateAccount(ref name)) if name == "work"
        ));
        // The original registration survives.
        assert_eq!(reg.session("work").unwrap().token_path(), h.path("work.json"));
    }

    #[test]
    fn test_replace_overwrites_explicitly() {
        let h = Harness::new();
        let mut reg = registry(&h);
        reg.register("work", h.path("work.json")).unwrap();

        reg.replace("work", h.path("other.json")).unwrap();
        assert_eq!(reg.session("work").unwrap().token_path(), h.path("other.json"));
        assert_eq!(reg.accounts(), vec!["work"]);
    }

    #[test]
    fn test_accounts_cannot_share_a_token_file() {
        let h = Harness::new();
        let mut reg = registry(&h);
        reg.register("my work", h.path("my_work_token.json")).unwrap();

        match reg.register("my_work", h.dir.path().join(".").join("my_work_token.json")) {
            Err(AuthError::TokenPathInUse { account, .. }) => assert_eq!(account, "my work"),
            other => panic!("unexpected result: {:?}", other.map(|s| s.account().to_string())),
        }
        assert_eq!(reg.accounts(), vec!["my work"]);

        reg.register("other", h.path("other.json")).unwrap();
        assert!(matches!(
            reg.replace("other", h.path("my_work_token.json")),
            Err(AuthError::TokenPathInUse { .. })
        ));
        // Re-pointing an account at its own file is fine.
        reg.replace("my work", h.path("my_work_token.json")).unwrap();
    }

    #[tokio::test]
    async fn test_account_with_own_backend_uses_its_own_server() {
        let h = Harness::new();
        let other = Harness::new();
        let mut reg = registry(&h);
        reg.register("source", h.path("source.json")).unwrap();
        reg.register_with_backend("dest", h.path("dest.json"), other.backend.clone())
            .unwrap();

        reg.authenticate("dest").await.unwrap();

        assert_eq!(other.authorizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.server.exchange_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.authorizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.server.network_calls(), 0);
        assert!(h.path("dest.json").exists());
        assert!(!reg.session("source").unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let h = Harness::new();
        let mut reg = registry(&h);

        assert!(matches!(
            reg.authenticate("ghost").await,
            Err(AuthError::UnknownAccount(_))
        ));
        assert!(matches!(
            reg.get_client("ghost"),
            Err(AuthError::UnknownAccount(_))
        ));
        assert!(matches!(
            reg.revoke("ghost").await,
            Err(AuthError::UnknownAccount(_))
        ));
    }

    #[tokio::test]
    async fn test_get_client_propagates_not_authenticated() {
        let h = Harness::new();
        let mut reg = registry(&h);
        reg.register("work", h.path("work.json")).unwrap();

        assert!(matches!(
            reg.get_client("work"),
            Err(AuthError::NotAuthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_interactive_login_then_snapshot() {
        let h = Harness::new();
        let mut reg = registry(&h);
        reg.register("work", h.path("work.json")).unwrap();

        let result = reg.authenticate("work").await.unwrap();
        assert!(matches!(result, AuthResult::ReauthorizedInteractively));
        assert!(reg.get_client("work").is_ok());

        let snapshot = reg.snapshot_authenticated().await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot["work"].label().starts_with("interactive-"));
    }

    #[tokio::test]
    async fn test_authenticating_one_account_leaves_other_untouched() {
        let h = Harness::new();
        let b_credential = expired_credential(Some("rt-b"));
        FileTokenStore.save(&h.path("b.json"), &b_credential).unwrap();

        let mut reg = registry(&h);
        reg.register("a", h.path("a.json")).unwrap();
        reg.register("b", h.path("b.json")).unwrap();

        reg.authenticate("a").await.unwrap();

        assert_eq!(FileTokenStore.load(&h.path("b.json")).unwrap(), Some(b_credential));
        let b = reg.session("b").unwrap();
        assert!(b.credential().is_none());
        assert!(!b.is_authenticated());
        assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_revoking_one_account_keeps_the_other() {
        let h = Harness::new();
        let mut reg = registry(&h);
        reg.register("a", h.path("a.json")).unwrap();
        reg.register("b", h.path("b.json")).unwrap();
        reg.authenticate("a").await.unwrap();
        reg.authenticate("b").await.unwrap();

        assert!(reg.revoke("a").await.unwrap().is_complete());

        assert!(matches!(
            reg.get_client("a"),
            Err(AuthError::NotAuthenticated(_))
        ));
        assert!(reg.get_client("b").is_ok());
        assert!(h.path("b.json").exists());
        assert!(!h.path("a.json").exists());
        // Revocation keeps the registration.
        assert_eq!(reg.accounts(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_snapshot_omits_failed_lookups_and_unauthenticated() {
        let h = Harness::new();
        FileTokenStore
            .save(&h.path("good.json"), &valid_credential("good"))
            .unwrap();
        FileTokenStore
            .save(&h.path("bad.json"), &valid_credential("bad"))
            .unwrap();
        h.clients
            .failing_tokens
            .lock()
            .unwrap()
            .insert("bad".to_string());

        let mut reg = registry(&h);
        reg.register("good", h.path("good.json")).unwrap();
        reg.register("bad", h.path("bad.json")).unwrap();
        reg.register("idle", h.path("idle.json")).unwrap();
        reg.authenticate("good").await.unwrap();
        reg.authenticate("bad").await.unwrap();

        let snapshot = reg.snapshot_authenticated().await;
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["good"]);
        assert_eq!(
            snapshot["good"].email_address.as_deref(),
            Some("good@example.com")
        );
    }

    #[tokio::test]
    async fn test_remove_deregisters() {
        let h = Harness::new();
        let mut reg = registry(&h);
        reg.register("work", h.path("work.json")).unwrap();

        assert!(reg.remove("work").is_some());
        assert!(reg.remove("work").is_none());
        assert!(matches!(
            reg.status("work"),
            Err(AuthError::UnknownAccount(_))
        ));
    }
}
