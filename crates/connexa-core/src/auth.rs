//! OAuth2 client-credentials tokens.
//!
//! [`TokenManager`] hands out tokens that stay valid for at least the clock-skew
//! buffer and refreshes them through a single-flight gate: concurrent callers that
//! find the token missing or expiring wait for one refresh and share its outcome.

use crate::classify::{ApiErrorBody, TransportFailure};
use crate::config::ConnexaConfig;
use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Default clock-skew buffer in seconds
pub const DEFAULT_CLOCK_SKEW_BUFFER: u64 = 30;

/// Lifetime assumed when the token endpoint omits `expires_in`, in seconds
pub const DEFAULT_TOKEN_LIFETIME: u64 = 3600;

/// Access token issued by the token endpoint.
pub struct Token {
    access_token: SecretString,
    /// Token type, normally `Bearer`
    pub token_type: String,
    /// Absolute expiry
    pub expires_at: Instant,
    refresh_token: Option<SecretString>,
}

impl Token {
    /// Create a token that expires `expires_in` from now.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            token_type: token_type.into(),
            expires_at: Instant::now() + expires_in,
            refresh_token: None,
        }
    }

    /// Bearer credential.
    #[must_use]
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// Refresh token, when the server issued one.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(ExposeSecret::expose_secret)
    }

    /// True while `now + skew < expires_at`.
    #[must_use]
    pub fn is_valid(&self, skew: Duration) -> bool {
        Instant::now() + skew < self.expires_at
    }

    /// Time left before expiry (zero once expired).
    #[must_use]
    pub fn expires_in(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Default)]
struct TokenState {
    token: Option<Arc<Token>>,
    // Bumped by every completed refresh, successful or not.
    generation: u64,
    last_error: Option<Error>,
}

/// Issues and refreshes access tokens.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
    clock_skew: Duration,
    timeout: Option<Duration>,
    state: Mutex<TokenState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a token manager posting to `token_url`.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id: client_id.into(),
            client_secret,
            clock_skew: Duration::from_secs(DEFAULT_CLOCK_SKEW_BUFFER),
            timeout: None,
            state: Mutex::new(TokenState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a token manager from client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if credentials are missing or the auth URL is invalid.
    pub fn from_config(config: &ConnexaConfig, http: reqwest::Client) -> Result<Self> {
        config.check()?;
        let auth_url = config.parse_auth_url()?;
        let token_url = Url::parse(&format!(
            "{}/token",
            auth_url.as_str().trim_end_matches('/')
        ))?;

        Ok(Self::new(
            http,
            token_url,
            config.client_id.clone(),
            config.client_secret.clone(),
        )
        .with_clock_skew(config.clock_skew_buffer())
        .with_timeout(config.http_config().read_timeout))
    }

    /// Set the clock-skew buffer.
    #[must_use]
    pub const fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Set the token request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Token endpoint URL.
    #[must_use]
    pub const fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Current token if it is still valid, without refreshing.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<Token>> {
        self.lock()
            .token
            .as_ref()
            .filter(|token| token.is_valid(self.clock_skew))
            .cloned()
    }

    /// Return a token valid for at least the clock-skew buffer, refreshing if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`]; `requires_reauth` is true when the server
    /// rejected the credentials and false when the refresh failed transiently or
    /// issued a token that expires inside the clock-skew buffer.
    pub async fn get_valid_token(&self) -> Result<Arc<Token>> {
        let observed = {
            let state = self.lock();
            if let Some(token) = &state.token {
                if token.is_valid(self.clock_skew) {
                    return Ok(Arc::clone(token));
                }
            }
            state.generation
        };

        let _gate = self.refresh_gate.lock().await;

        {
            let state = self.lock();
            if state.generation != observed {
                // Another caller refreshed while we waited; share its outcome.
                if let Some(err) = &state.last_error {
                    return Err(err.clone());
                }
                if let Some(token) = state
                    .token
                    .as_ref()
                    .filter(|token| token.is_valid(self.clock_skew))
                {
                    return Ok(Arc::clone(token));
                }
            }
        }

        let outcome = self
            .fetch_token()
            .await
            .and_then(|token| self.check_lifetime(token));

        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        match outcome {
            Ok(token) => {
                let token = Arc::new(token);
                state.token = Some(Arc::clone(&token));
                state.last_error = None;
                info!(expires_in = ?token.expires_in(), "access token refreshed");
                Ok(token)
            }
            Err(err) => {
                warn!(
                    requires_reauth = err.requires_reauth(),
                    error = %err,
                    "token refresh failed"
                );
                state.token = None;
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Drop `rejected` so the next call refreshes. A token that has already been
    /// replaced is left alone, which lets concurrent 401s share one refresh.
    pub fn invalidate(&self, rejected: &Arc<Token>) {
        let mut state = self.lock();
        if state
            .token
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, rejected))
        {
            debug!("invalidating rejected access token");
            state.token = None;
        }
    }

    fn check_lifetime(&self, token: Token) -> Result<Token> {
        if token.is_valid(self.clock_skew) {
            return Ok(token);
        }
        Err(Error::Authentication {
            message: format!(
                "Token endpoint issued a token expiring in {:?}, inside the {:?} clock-skew buffer",
                token.expires_in(),
                self.clock_skew
            ),
            status: None,
            code: Some("token_expires_too_soon".to_string()),
            requires_reauth: false,
            request_id: None,
        })
    }

    async fn fetch_token(&self) -> Result<Token> {
        debug!(url = %self.token_url, "requesting access token");

        let mut request = self.http.post(self.token_url.clone()).form(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ]);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|err| unreachable_error(&err))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| unreachable_error(&err))?;

        if !status.is_success() {
            let parsed = ApiErrorBody::parse(&body);
            let message = parsed
                .message()
                .unwrap_or_else(|| format!("token endpoint returned {status}"));
            return Err(Error::Authentication {
                message,
                status: Some(status.as_u16()),
                code: parsed.error,
                // Rejected credentials will not fix themselves; throttling and 5xx might.
                requires_reauth: status.is_client_error()
                    && status != reqwest::StatusCode::TOO_MANY_REQUESTS,
                request_id: None,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_slice(&body).map_err(|err| Error::Authentication {
                message: format!("Malformed token response: {err}"),
                status: Some(status.as_u16()),
                code: None,
                requires_reauth: false,
                request_id: None,
            })?;

        let expires_in = Duration::from_secs(parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME));
        let mut token = Token::new(parsed.access_token, parsed.token_type, expires_in);
        token.refresh_token = parsed.refresh_token.map(SecretString::from);
        Ok(token)
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unreachable_error(err: &reqwest::Error) -> Error {
    let failure = TransportFailure::from_reqwest(err);
    Error::Authentication {
        message: format!("Token endpoint unreachable: {}", failure.message()),
        status: None,
        code: None,
        requires_reauth: false,
        request_id: None,
    }
}
