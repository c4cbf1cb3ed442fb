//! Authenticated HTTP client for the Google Drive API
//!
//! Wraps reqwest::Client with the account's bearer token.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::Credential;
use crate::models::Profile;

const DRIVE_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("401 Unauthorized for {0}; token may be invalid")]
    Unauthorized(String),

    #[error("HTTP {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Handle to the remote resource API for one authenticated account.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Identity of the account the handle acts for.
    async fn get_identity(&self) -> Result<Profile, ApiError>;
}

pub type ClientHandle = Arc<dyn ApiClient>;

/// Builds a client handle from a valid credential.
pub trait ClientFactory: Send + Sync {
    fn build_client(&self, credential: &Credential) -> ClientHandle;
}

/// Drive v3 client authenticated with a bearer token.
pub struct DriveClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl DriveClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, credential: &Credential) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            access_token: credential.access_token.clone(),
        }
    }

    /// GET request against the Drive API.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Drive GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        check_response(resp, &url).await
    }
}

#[async_trait]
impl ApiClient for DriveClient {
    async fn get_identity(&self) -> Result<Profile, ApiError> {
        let resp = self.get("/about?fields=user").await?;
        let about: super::about::AboutResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("about: {}", e)))?;
        Ok(about.user)
    }
}

/// Produces `DriveClient`s sharing one connection pool.
#[derive(Clone)]
pub struct DriveClientFactory {
    http: reqwest::Client,
    base_url: String,
}

impl DriveClientFactory {
    pub fn new() -> Self {
        Self::with_base_url(DRIVE_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for DriveClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for DriveClientFactory {
    fn build_client(&self, credential: &Credential) -> ClientHandle {
        Arc::new(DriveClient::new(
            self.http.clone(),
            self.base_url.clone(),
            credential,
        ))
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized(url.to_string()));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body: truncate_body(&body),
        });
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");

        let long = "é".repeat(400);
        let truncated = truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }
}
