//! OAuth2 authorization code flow against the Google authorization server

use async_trait::async_trait;
use oauth2::{
    basic::{BasicClient, BasicTokenResponse},
    AccessToken, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, RevocationUrl, Scope,
    StandardRevocableToken, TokenResponse, TokenUrl,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::tokens::expires_at;
use super::{AuthConfig, AuthError, Credential};

/// Tokens returned by a code exchange or a refresh
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    /// Granted scopes, when the server reports them
    pub scopes: Option<BTreeSet<String>>,
}

impl TokenGrant {
    fn from_response(resp: &BasicTokenResponse) -> Self {
        Self {
            access_token: resp.access_token().secret().to_string(),
            refresh_token: resp.refresh_token().map(|rt| rt.secret().to_string()),
            expires_in: resp.expires_in().map(|d| d.as_secs()),
            scopes: resp
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Build a fresh credential; without reported scopes, the requested ones were granted.
    pub fn into_credential(self, requested: &BTreeSet<String>) -> Credential {
        let scopes = self.scopes.unwrap_or_else(|| requested.clone());
        Credential::new(self.access_token, self.refresh_token, self.expires_in, scopes)
    }

    /// Apply a refresh response to an existing credential in place.
    pub fn refresh_into(self, credential: &mut Credential) {
        credential.access_token = self.access_token;
        credential.expiry = expires_at(self.expires_in);
        // Servers usually omit the refresh token on refresh; the old one stays good.
        if let Some(rt) = self.refresh_token {
            credential.refresh_token = Some(rt);
        }
        if let Some(scopes) = self.scopes {
            credential.scopes = scopes;
        }
    }
}

/// An authorization code captured from the browser redirect
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub code: String,
    pub pkce_verifier: Option<String>,
    /// Must match the redirect URI sent with the authorization request
    pub redirect_uri: String,
}

/// Consent URL plus the secrets needed to validate and complete it
#[derive(Debug)]
pub struct PendingAuthorization {
    pub url: Url,
    pub state: String,
    pub pkce_verifier: String,
}

/// Remote authorization server calls
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    async fn exchange_code(&self, grant: &AuthorizationGrant) -> Result<TokenGrant, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;
    async fn revoke(&self, credential: &Credential) -> Result<(), AuthError>;
}

/// Obtains user consent and returns the authorization code
#[async_trait]
pub trait InteractiveAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        scopes: &BTreeSet<String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AuthorizationGrant, AuthError>;
}

/// oauth2-backed client for a single OAuth application
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client: BasicClient,
}

impl OAuthClient {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let auth_url = AuthUrl::new(config.auth_url.clone())
            .map_err(|e| AuthError::Configuration(format!("auth_url: {}", e)))?;
        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|e| AuthError::Configuration(format!("token_url: {}", e)))?;

        let mut client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            config.client_secret.clone().map(ClientSecret::new),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody);

        if let Some(ref revocation_url) = config.revocation_url {
            let url = RevocationUrl::new(revocation_url.clone())
                .map_err(|e| AuthError::Configuration(format!("revocation_url: {}", e)))?;
            client = client.set_revocation_uri(url);
        }

        Ok(Self { client })
    }

    fn with_redirect(&self, redirect_uri: &str) -> Result<BasicClient, AuthError> {
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| AuthError::Configuration(format!("redirect_uri: {}", e)))?;
        Ok(self.client.clone().set_redirect_uri(redirect))
    }

    /// Build the consent URL. Offline access with forced consent so Google issues a refresh token.
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        scopes: &BTreeSet<String>,
    ) -> Result<PendingAuthorization, AuthError> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let (url, state) = self
            .with_redirect(redirect_uri)?
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .set_pkce_challenge(challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();

        Ok(PendingAuthorization {
            url,
            state: state.secret().to_string(),
            pkce_verifier: verifier.secret().to_string(),
        })
    }
}

#[async_trait]
impl AuthorizationServer for OAuthClient {
    async fn exchange_code(&self, grant: &AuthorizationGrant) -> Result<TokenGrant, AuthError> {
        let client = self.with_redirect(&grant.redirect_uri)?;
        let mut request = client.exchange_code(AuthorizationCode::new(grant.code.clone()));
        if let Some(ref verifier) = grant.pkce_verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.clone()));
        }

        let resp = request
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(AuthError::from_token_request)?;
        Ok(TokenGrant::from_response(&resp))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let resp = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(AuthError::from_token_request)?;
        Ok(TokenGrant::from_response(&resp))
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), AuthError> {
        // Revoking the refresh token ends the whole grant
        let token = match credential.refresh_token {
            Some(ref rt) => StandardRevocableToken::RefreshToken(RefreshToken::new(rt.clone())),
            None => StandardRevocableToken::AccessToken(AccessToken::new(
                credential.access_token.clone(),
            )),
        };

        self.client
            .revoke_token(token)
            .map_err(|e| AuthError::Configuration(e.to_string()))?
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(AuthError::from_token_request)
    }
}
