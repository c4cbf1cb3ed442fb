//! In-process fakes for the remote collaborators

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::oauth::{AuthorizationGrant, AuthorizationServer, InteractiveAuthorizer, TokenGrant};
use super::session::{AuthBackend, SessionSettings};
use super::{AuthError, Credential, FileTokenStore};
use crate::api::{ApiClient, ApiError, ClientFactory, ClientHandle};
use crate::models::Profile;

pub(crate) const SCOPE: &str = "https://www.googleapis.com/auth/drive";

pub(crate) fn required_scopes() -> BTreeSet<String> {
    [SCOPE.to_string()].into_iter().collect()
}

pub(crate) fn settings() -> SessionSettings {
    SessionSettings {
        scopes: required_scopes(),
        interactive_timeout: Duration::from_secs(1),
    }
}

pub(crate) fn valid_credential(access_token: &str) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        refresh_token: Some("rt-cached".to_string()),
        expiry: Some(Utc::now() + ChronoDuration::hours(1)),
        scopes: required_scopes(),
    }
}

pub(crate) fn expired_credential(refresh_token: Option<&str>) -> Credential {
    Credential {
        access_token: "stale".to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expiry: Some(Utc::now() - ChronoDuration::hours(1)),
        scopes: required_scopes(),
    }
}

#[derive(Default)]
pub(crate) struct MockServer {
    pub refresh_fails: AtomicBool,
    pub exchange_fails: AtomicBool,
    pub revoke_fails: AtomicBool,
    pub refresh_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
    pub revoked: Mutex<Vec<String>>,
}

impl MockServer {
    pub fn network_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
            + self.exchange_calls.load(Ordering::SeqCst)
            + self.revoke_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationServer for MockServer {
    async fn exchange_code(&self, grant: &AuthorizationGrant) -> Result<TokenGrant, AuthError> {
        let n = self.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.exchange_fails.load(Ordering::SeqCst) {
            return Err(AuthError::Network("connection refused".to_string()));
        }
        Ok(TokenGrant {
            access_token: format!("interactive-{}-{}", grant.code, n),
            refresh_token: Some("rt-interactive".to_string()),
            expires_in: Some(3600),
            scopes: None,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected(r#"{"error":"invalid_grant"}"#.to_string()));
        }
        Ok(TokenGrant {
            access_token: format!("refreshed-{}-{}", refresh_token, n),
            refresh_token: None,
            expires_in: Some(3600),
            scopes: None,
        })
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), AuthError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        if self.revoke_fails.load(Ordering::SeqCst) {
            return Err(AuthError::Network("timed out".to_string()));
        }
        let token = credential
            .refresh_token
            .clone()
            .unwrap_or_else(|| credential.access_token.clone());
        self.revoked.lock().unwrap().push(token);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockAuthorizer {
    pub fails: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl InteractiveAuthorizer for MockAuthorizer {
    async fn authorize(
        &self,
        _scopes: &BTreeSet<String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AuthorizationGrant, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        if self.fails.load(Ordering::SeqCst) {
            return Err(AuthError::TimedOut(timeout));
        }
        Ok(AuthorizationGrant {
            code: "code".to_string(),
            pkce_verifier: None,
            redirect_uri: "http://127.0.0.1:1/".to_string(),
        })
    }
}

struct MockApiClient {
    access_token: String,
    fails: bool,
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn get_identity(&self) -> Result<Profile, ApiError> {
        if self.fails {
            return Err(ApiError::InvalidResponse("identity lookup failed".to_string()));
        }
        Ok(Profile {
            display_name: None,
            email_address: Some(format!("{}@example.com", self.access_token)),
            permission_id: None,
            photo_link: None,
        })
    }
}

/// Builds mock clients; identity lookups fail for access tokens in `failing_tokens`.
#[derive(Default)]
pub(crate) struct MockClientFactory {
    pub built: AtomicUsize,
    pub failing_tokens: Mutex<HashSet<String>>,
}

impl ClientFactory for MockClientFactory {
    fn build_client(&self, credential: &Credential) -> ClientHandle {
        self.built.fetch_add(1, Ordering::SeqCst);
        let fails = self
            .failing_tokens
            .lock()
            .unwrap()
            .contains(&credential.access_token);
        Arc::new(MockApiClient {
            access_token: credential.access_token.clone(),
            fails,
        })
    }
}

pub(crate) struct Harness {
    pub server: Arc<MockServer>,
    pub authorizer: Arc<MockAuthorizer>,
    pub clients: Arc<MockClientFactory>,
    pub backend: AuthBackend,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let server = Arc::new(MockServer::default());
        let authorizer = Arc::new(MockAuthorizer::default());
        let clients = Arc::new(MockClientFactory::default());
        let backend = AuthBackend {
            store: Arc::new(FileTokenStore),
            server: server.clone(),
            authorizer: authorizer.clone(),
            clients: clients.clone(),
        };

        Self {
            server,
            authorizer,
            clients,
            backend,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}
