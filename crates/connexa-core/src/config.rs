//! Configuration for CloudConnexa clients.
//!
//! [`ConnexaConfig`] carries the credentials, the API version and every tunable of the
//! request pipeline. All durations are expressed in (fractional) seconds so the
//! structure round-trips through JSON/TOML/env files unchanged.

use crate::breaker::CircuitBreakerConfig;
use crate::client::ClientConfig;
use crate::retry::RetryPolicy;
use crate::version::ApiVersion;
use crate::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Environment variable holding the API base URL.
pub const ENV_API_URL: &str = "CLOUDCONNEXA_API_URL";
/// Environment variable holding the OAuth2 client ID.
pub const ENV_CLIENT_ID: &str = "CLOUDCONNEXA_CLIENT_ID";
/// Environment variable holding the OAuth2 client secret.
pub const ENV_CLIENT_SECRET: &str = "CLOUDCONNEXA_CLIENT_SECRET";
/// Environment variable pinning the API version.
pub const ENV_API_VERSION: &str = "CLOUDCONNEXA_API_VERSION";

/// Configuration for a CloudConnexa client instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConnexaConfig {
    /// API base URL (e.g. `https://acme.api.openvpn.com`)
    #[validate(url)]
    pub api_url: String,

    /// OAuth2 client ID
    #[validate(length(min = 1))]
    pub client_id: String,

    /// OAuth2 client secret
    #[serde(skip_serializing)]
    pub client_secret: SecretString,

    /// API version; `None` means detect it from the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<ApiVersion>,

    /// OAuth2 base URL; the token endpoint is `{auth_url}/token`
    #[validate(url)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    /// Accept plain `http` URLs (local mock servers only)
    #[serde(default)]
    pub allow_http: bool,

    /// Maximum number of retries after the first attempt
    #[validate(range(min = 0, max = 10))]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in seconds
    #[validate(range(min = 0.0, max = 60.0))]
    #[serde(default = "default_backoff_factor", alias = "backoff_factor")]
    pub backoff_factor_secs: f64,

    /// Backoff cap in seconds
    #[validate(range(min = 0.0, max = 3600.0))]
    #[serde(default = "default_backoff_max", alias = "backoff_max")]
    pub backoff_max_secs: f64,

    /// Randomize backoff delays by a factor in `[0.5, 1.5]`
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: bool,

    /// Consecutive breaker-relevant failures that open a circuit
    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before allowing a trial request
    #[validate(range(min = 0.0, max = 3600.0))]
    #[serde(default = "default_recovery_timeout", alias = "recovery_timeout")]
    pub recovery_timeout_secs: f64,

    /// TCP/TLS connect timeout in seconds
    #[validate(range(min = 0.1, max = 300.0))]
    #[serde(default = "default_connect_timeout", alias = "connect_timeout")]
    pub connect_timeout_secs: f64,

    /// Per-attempt read timeout in seconds
    #[validate(range(min = 0.1, max = 600.0))]
    #[serde(default = "default_read_timeout", alias = "read_timeout")]
    pub read_timeout_secs: f64,

    /// Tokens expiring within this many seconds are refreshed
    #[validate(range(min = 0.0, max = 600.0))]
    #[serde(default = "default_clock_skew")]
    pub clock_skew_buffer_secs: f64,

    /// Default overall deadline per logical call, in seconds. Resource operations
    /// that walk several pages are bounded by it as a whole.
    #[validate(range(min = 0.001, max = 3600.0))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_deadline_secs: Option<f64>,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_factor() -> f64 {
    0.5
}

const fn default_backoff_max() -> f64 {
    30.0
}

const fn default_backoff_jitter() -> bool {
    true
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout() -> f64 {
    30.0
}

const fn default_connect_timeout() -> f64 {
    10.0
}

const fn default_read_timeout() -> f64 {
    30.0
}

const fn default_clock_skew() -> f64 {
    30.0
}

impl ConnexaConfig {
    /// Create a new configuration with required parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the URL is malformed, not `https`, or the
    /// credentials are empty.
    pub fn new(
        api_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, Error> {
        let config = Self::unchecked(api_url.into(), client_id.into(), client_secret.into());
        config.check()?;
        Ok(config)
    }

    /// Build a configuration from `CLOUDCONNEXA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self, Error> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::Configuration(format!("{name} is not set")))
        };

        let mut config = Self::unchecked(
            required(ENV_API_URL)?,
            required(ENV_CLIENT_ID)?,
            required(ENV_CLIENT_SECRET)?,
        );
        if let Ok(version) = std::env::var(ENV_API_VERSION) {
            config.api_version = Some(version.parse()?);
        }
        config.check()?;
        Ok(config)
    }

    fn unchecked(api_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            api_url,
            client_id,
            client_secret: SecretString::from(client_secret),
            api_version: None,
            auth_url: None,
            allow_http: false,
            max_retries: default_max_retries(),
            backoff_factor_secs: default_backoff_factor(),
            backoff_max_secs: default_backoff_max(),
            backoff_jitter: default_backoff_jitter(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            clock_skew_buffer_secs: default_clock_skew(),
            request_deadline_secs: None,
        }
    }

    /// Validate ranges, URLs, scheme policy and credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first problem found.
    pub fn check(&self) -> Result<(), Error> {
        self.validate()
            .map_err(|e| Error::Configuration(format!("Invalid configuration: {e}")))?;

        if self.client_id.trim().is_empty() || self.client_secret.expose_secret().trim().is_empty() {
            return Err(Error::Configuration(
                "Client ID and client secret are required".to_string(),
            ));
        }

        self.parse_api_url()?;
        self.parse_auth_url()?;
        Ok(())
    }

    /// Pin the API version instead of detecting it.
    #[must_use]
    pub const fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = Some(version);
        self
    }

    /// Override the OAuth2 base URL.
    #[must_use]
    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = Some(auth_url.into());
        self
    }

    /// Allow plain `http` URLs.
    #[must_use]
    pub const fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Set maximum retry attempts.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff base and cap.
    #[must_use]
    pub fn with_backoff(mut self, factor: Duration, max: Duration) -> Self {
        self.backoff_factor_secs = factor.as_secs_f64();
        self.backoff_max_secs = max.as_secs_f64();
        self
    }

    /// Enable or disable backoff jitter.
    #[must_use]
    pub const fn with_backoff_jitter(mut self, jitter: bool) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    /// Set the circuit breaker threshold and recovery timeout.
    #[must_use]
    pub fn with_circuit_breaker(mut self, failure_threshold: u32, recovery: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.recovery_timeout_secs = recovery.as_secs_f64();
        self
    }

    /// Set connect and read timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout_secs = connect.as_secs_f64();
        self.read_timeout_secs = read.as_secs_f64();
        self
    }

    /// Set the token clock-skew buffer.
    #[must_use]
    pub fn with_clock_skew_buffer(mut self, buffer: Duration) -> Self {
        self.clock_skew_buffer_secs = buffer.as_secs_f64();
        self
    }

    /// Set a default overall deadline per logical call.
    #[must_use]
    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline_secs = Some(deadline.as_secs_f64());
        self
    }

    /// Parse the API URL, enforcing the scheme policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed or uses a disallowed scheme.
    pub fn parse_api_url(&self) -> Result<Url, Error> {
        self.parse_endpoint("API", &self.api_url)
    }

    /// Parse the OAuth2 base URL (defaulting to `{api_url}/api/v1/oauth`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed or uses a disallowed scheme.
    pub fn parse_auth_url(&self) -> Result<Url, Error> {
        match &self.auth_url {
            Some(url) => self.parse_endpoint("auth", url),
            None => self.parse_endpoint(
                "auth",
                &format!("{}/api/v1/oauth", self.api_url.trim_end_matches('/')),
            ),
        }
    }

    fn parse_endpoint(&self, label: &str, raw: &str) -> Result<Url, Error> {
        let url = Url::parse(raw)
            .map_err(|e| Error::Configuration(format!("Invalid {label} URL `{raw}`: {e}")))?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_http => Ok(url),
            scheme => Err(Error::Configuration(format!(
                "{label} URL must use https, got `{scheme}`"
            ))),
        }
    }

    /// Retry policy derived from the tunables.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_backoff_factor(secs(self.backoff_factor_secs))
            .with_backoff_max(secs(self.backoff_max_secs))
            .with_jitter(self.backoff_jitter)
    }

    /// Circuit breaker settings derived from the tunables.
    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(self.failure_threshold, secs(self.recovery_timeout_secs))
    }

    /// HTTP transport settings derived from the tunables.
    #[must_use]
    pub fn http_config(&self) -> ClientConfig {
        ClientConfig::new()
            .with_connect_timeout(secs(self.connect_timeout_secs))
            .with_read_timeout(secs(self.read_timeout_secs))
    }

    /// Token clock-skew buffer.
    #[must_use]
    pub fn clock_skew_buffer(&self) -> Duration {
        secs(self.clock_skew_buffer_secs)
    }

    /// Default overall deadline per logical call.
    #[must_use]
    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_secs.map(secs)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
