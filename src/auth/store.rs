//! Token store: owns the single active token and talks to the logon endpoint.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::token::{Token, TokenInfo};
use crate::clock::Clock;
use crate::error::{BridgeError, Result};
use crate::transport::{join_url, ApiRequest, Method, Transport};

/// Path of the authentication endpoint, relative to the API base URL.
pub const AUTH_PATH: &str = "logon/getauthenticationtoken";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthResponse {
    result: Option<AuthResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthResult {
    #[serde(default)]
    token: String,
    #[serde(default)]
    expires: String,
}

/// Username and password of the service account.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Holds at most one token and obtains a new one when it goes stale.
///
/// Readers take the token under a read lock. Authentication is single-flight:
/// callers that find the token stale queue on `auth_lock` and re-check after
/// acquiring it, so a burst of requests shares one logon round-trip.
pub struct TokenStore {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    base_url: String,
    credentials: Credentials,
    expiry_buffer: chrono::Duration,
    current: RwLock<Option<Token>>,
    auth_lock: tokio::sync::Mutex<()>,
}

impl TokenStore {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
        credentials: Credentials,
        expiry_buffer: std::time::Duration,
    ) -> Self {
        let expiry_buffer = chrono::Duration::from_std(expiry_buffer)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Self {
            transport,
            clock,
            base_url: base_url.into(),
            credentials,
            expiry_buffer,
            current: RwLock::new(None),
            auth_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Obtain a fresh token from the logon endpoint.
    ///
    /// Returns `Ok(false)` when the remote side refused or could not be reached;
    /// only a request that could not be issued at all is an `Err`.
    pub async fn authenticate(&self) -> Result<bool> {
        let _guard = self.auth_lock.lock().await;
        self.authenticate_locked().await
    }

    async fn authenticate_locked(&self) -> Result<bool> {
        let request = ApiRequest::new(Method::Get, join_url(&self.base_url, AUTH_PATH))
            .with_query("email", &self.credentials.username)
            .with_query("password", &self.credentials.password);

        debug!("Authenticating as {}", self.credentials.username);

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) if e.is_transient() => {
                error!("Authentication request failed: {}", e);
                return Ok(false);
            }
            Err(e) => return Err(BridgeError::Transport(e)),
        };

        if response.status != 200 {
            error!("Authentication failed with status {}", response.status);
            return Ok(false);
        }

        let parsed: AuthResponse = match serde_json::from_str(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Malformed authentication response: {}", e);
                return Ok(false);
            }
        };

        let Some(result) = parsed.result else {
            error!("Authentication response has no Result");
            return Ok(false);
        };

        if result.token.is_empty() {
            error!("Authentication response carries an empty token");
            return Ok(false);
        }

        if crate::auth::token::parse_expiry(&result.expires).is_none() {
            warn!("Token expiry {:?} is not parseable", result.expires);
        }

        info!(
            "Authenticated as {}, token expires at {}",
            self.credentials.username, result.expires
        );
        *self.current.write() = Some(Token::new(result.token, result.expires));
        Ok(true)
    }

    /// Make sure a non-stale token is held, authenticating if necessary.
    pub async fn ensure_valid(&self) -> Result<bool> {
        if !self.is_stale() {
            return Ok(true);
        }

        let _guard = self.auth_lock.lock().await;
        if !self.is_stale() {
            // Another caller refreshed while we waited
            return Ok(true);
        }
        self.authenticate_locked().await
    }

    /// Whether the held token (if any) must not be used now.
    pub fn is_stale(&self) -> bool {
        let now = self.clock.now();
        match self.current.read().as_ref() {
            Some(token) => token.is_stale_at(now, self.expiry_buffer),
            None => true,
        }
    }

    /// Diagnostic snapshot; never triggers a refresh.
    pub fn info(&self) -> TokenInfo {
        let current = self.current.read();
        TokenInfo {
            has_token: current.as_ref().map_or(false, |t| !t.credential.is_empty()),
            expires_at: current.as_ref().map(|t| t.expires_at.clone()),
            is_expired: current
                .as_ref()
                .map_or(true, |t| t.is_stale_at(self.clock.now(), self.expiry_buffer)),
            identity: self.credentials.username.clone(),
        }
    }

    /// Drop the held token, forcing the next `ensure_valid` to authenticate.
    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn credential(&self) -> Option<String> {
        self.current.read().as_ref().map(|t| t.credential.clone())
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.current.read().as_ref().and_then(Token::expiry)
    }

    pub fn identity(&self) -> &str {
        &self.credentials.username
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[cfg(test)]
    pub(crate) fn replace(&self, token: Token) {
        *self.current.write() = Some(token);
    }
}
