//! Local redirect listener for the interactive consent flow
//!
//! Binds a loopback port, prints the consent URL, and waits for the browser
//! to be redirected back with `?code=...&state=...`.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::oauth::{AuthorizationGrant, InteractiveAuthorizer, OAuthClient};
use super::AuthError;

const SUCCESS_PAGE: &str = "<html><body><h3>Authentication complete.</h3>\
<p>You may close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h3>Authentication failed.</h3>\
<p>Return to the terminal for details.</p></body></html>";

/// How long a connection may take to deliver its request line and headers
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// What a single redirect request carried
#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    Code { code: String, state: Option<String> },
    Denied(String),
    /// Not an OAuth redirect (favicon, health checks)
    Unrelated,
}

fn parse_request_line(line: &str) -> Redirect {
    let mut parts = line.split_whitespace();
    let (Some("GET"), Some(target)) = (parts.next(), parts.next()) else {
        return Redirect::Unrelated;
    };
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{}", target)) else {
        return Redirect::Unrelated;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Redirect::Denied(error),
        (Some(code), None) => Redirect::Code { code, state },
        (None, None) => Redirect::Unrelated,
    }
}

/// Loopback HTTP listener that receives one authorization redirect
pub struct CallbackListener {
    listener: TcpListener,
    redirect_uri: String,
}

impl CallbackListener {
    /// Bind on 127.0.0.1; port 0 picks an ephemeral port.
    pub async fn bind(port: u16) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| AuthError::Callback(format!("bind 127.0.0.1:{}: {}", port, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| AuthError::Callback(e.to_string()))?;

        Ok(Self {
            listener,
            redirect_uri: format!("http://127.0.0.1:{}/", addr.port()),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Wait for the redirect carrying `expected_state`, bounded by `timeout` and `cancel`.
    pub async fn wait_for_code(
        self,
        expected_state: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            res = tokio::time::timeout(timeout, self.accept_loop(expected_state)) => {
                res.unwrap_or(Err(AuthError::TimedOut(timeout)))
            }
        }
    }

    /// Connections are served concurrently, so an idle preconnect cannot hold up the redirect.
    async fn accept_loop(&self, expected_state: &str) -> Result<String, AuthError> {
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| AuthError::Callback(e.to_string()))?;
                    tracing::debug!("Callback connection from {}", peer);
                    in_flight.push(handle_connection(stream, expected_state));
                }
                Some(handled) = in_flight.next(), if !in_flight.is_empty() => match handled {
                    Ok(Some(code)) => return Ok(code),
                    Ok(None) => {}
                    Err(AuthError::Callback(e)) => {
                        tracing::debug!("Dropping malformed callback request: {}", e);
                    }
                    Err(e) => return Err(e),
                },
            }
        }
    }
}

/// Read the request line, draining headers so closing the socket does not reset the connection.
async fn read_request(reader: &mut BufReader<TcpStream>) -> io::Result<String> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header.trim().is_empty() {
            break;
        }
    }
    Ok(request_line)
}

async fn handle_connection(
    stream: TcpStream,
    expected_state: &str,
) -> Result<Option<String>, AuthError> {
    let mut reader = BufReader::new(stream);
    let request_line = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request(&mut reader))
        .await
        .map_err(|_| AuthError::Callback("no request received".to_string()))?
        .map_err(|e| AuthError::Callback(e.to_string()))?;

    let (status, body, outcome) = match parse_request_line(&request_line) {
        Redirect::Code { code, state } => {
            if state.as_deref() == Some(expected_state) {
                ("200 OK", SUCCESS_PAGE, Ok(Some(code)))
            } else {
                (
                    "400 Bad Request",
                    FAILURE_PAGE,
                    Err(AuthError::Rejected("redirect state mismatch".to_string())),
                )
            }
        }
        Redirect::Denied(error) => (
            "200 OK",
            FAILURE_PAGE,
            Err(AuthError::Rejected(format!("consent denied: {}", error))),
        ),
        Redirect::Unrelated => ("404 Not Found", "", Ok(None)),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let mut stream = reader.into_inner();
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!("Failed to answer callback request: {}", e);
    }
    let _ = stream.shutdown().await;

    outcome
}

/// Interactive authorizer that sends the user to a browser and listens on loopback
pub struct LoopbackAuthorizer {
    client: OAuthClient,
    port: u16,
}

impl LoopbackAuthorizer {
    pub fn new(client: OAuthClient, port: u16) -> Self {
        Self { client, port }
    }
}

#[async_trait]
impl InteractiveAuthorizer for LoopbackAuthorizer {
    async fn authorize(
        &self,
        scopes: &BTreeSet<String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AuthorizationGrant, AuthError> {
        let listener = CallbackListener::bind(self.port).await?;
        let redirect_uri = listener.redirect_uri().to_string();
        let pending = self.client.authorize_url(&redirect_uri, scopes)?;

        println!();
        println!("To sign in, open this URL in a browser:");
        println!("  {}", pending.url);
        println!();

        tracing::info!("Waiting for authorization redirect on {}...", redirect_uri);
        let code = listener
            .wait_for_code(&pending.state, timeout, cancel)
            .await?;

        Ok(AuthorizationGrant {
            code,
            pkce_verifier: Some(pending.pkce_verifier),
            redirect_uri,
        })
    }
}
