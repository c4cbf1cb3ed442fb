use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::tokens::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(String),

    /// The authorization server answered, but refused the grant.
    #[error("Authorization rejected: {0}")]
    Rejected(String),

    #[error("Account '{0}' is not authenticated")]
    NotAuthenticated(String),

    #[error("Account '{0}' is not registered")]
    UnknownAccount(String),

    #[error("Account '{0}' is already registered")]
    DuplicateAccount(String),

    #[error("Token file {} is already used by account '{account}'", .path.display())]
    TokenPathInUse { path: PathBuf, account: String },

    #[error("Credential is missing required scopes: {}", .missing.join(", "))]
    ScopeMismatch { missing: Vec<String> },

    #[error("Authorization was cancelled")]
    Cancelled,

    #[error("Timed out after {0:?} waiting for the authorization redirect")]
    TimedOut(Duration),

    #[error("Callback listener error: {0}")]
    Callback(String),

    #[error("OAuth client misconfigured: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Convert an oauth2 request failure, keeping transport errors apart from server refusals.
    pub(crate) fn from_token_request<RE, T>(err: oauth2::RequestTokenError<RE, T>) -> Self
    where
        RE: std::error::Error + 'static,
        T: oauth2::ErrorResponse + 'static,
    {
        use oauth2::RequestTokenError;

        match err {
            RequestTokenError::ServerResponse(resp) => AuthError::Rejected(
                serde_json::to_string(&resp).unwrap_or_else(|_| format!("{:?}", resp)),
            ),
            RequestTokenError::Request(e) => AuthError::Network(e.to_string()),
            RequestTokenError::Parse(e, _) => {
                AuthError::Network(format!("unparseable token response: {}", e))
            }
            RequestTokenError::Other(msg) => AuthError::Network(msg),
        }
    }
}
