//! Error types for CloudConnexa operations.
//!
//! Every failure that leaves the request pipeline is one of the variants below.
//! Raw transport errors and HTTP statuses never cross the crate boundary; they are
//! classified first (see [`crate::classify`]) and then surfaced as a typed error that
//! carries the status code, the server's error code and a troubleshooting hint.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Main error type for CloudConnexa operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Local misconfiguration (missing credentials, malformed URL, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The API rejected the credentials or the token.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Human-readable message
        message: String,
        /// HTTP status, when the failure came from a response
        status: Option<u16>,
        /// Server error code (e.g. `invalid_client`)
        code: Option<String>,
        /// True when retrying with the same credentials cannot succeed
        requires_reauth: bool,
        /// Request id of the failed call
        request_id: Option<String>,
    },

    /// The request was rejected as invalid.
    #[error("Validation failed: {message}")]
    Validation {
        /// Human-readable message
        message: String,
        /// HTTP status (400, 422, or another 4xx)
        status: u16,
        /// Server error code, if any
        code: Option<String>,
        /// Field-level messages keyed by field name
        field_errors: BTreeMap<String, Vec<String>>,
        /// Request id of the failed call
        request_id: Option<String>,
    },

    /// The requested resource does not exist.
    #[error("Not found: {message}")]
    ResourceNotFound {
        /// Human-readable message
        message: String,
        /// Request id of the failed call
        request_id: Option<String>,
    },

    /// The API throttled the caller.
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Human-readable message
        message: String,
        /// Server-directed wait before the next attempt
        retry_after: Option<Duration>,
        /// Request id of the failed call
        request_id: Option<String>,
    },

    /// The API answered with a 5xx status.
    #[error("Server error {status}: {message}")]
    Server {
        /// HTTP status
        status: u16,
        /// Human-readable message
        message: String,
        /// Server error code, if any
        code: Option<String>,
        /// True for 502/503/504, which usually clear on their own
        is_transient: bool,
        /// Request id of the failed call
        request_id: Option<String>,
    },

    /// No response was received (timeout, connect, TLS or DNS failure).
    #[error("Network error: {message}")]
    Network {
        /// Human-readable message
        message: String,
        /// True when the failure was a timeout or an elapsed deadline
        timeout: bool,
        /// Request id of the failed call
        request_id: Option<String>,
    },

    /// The circuit breaker for the endpoint group is open.
    #[error("Service unavailable: circuit open for `{endpoint_group}`")]
    ServiceUnavailable {
        /// Endpoint group whose breaker rejected the call
        endpoint_group: String,
        /// Request id of the rejected call
        request_id: Option<String>,
    },

    /// A successful response could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The selected API version lacks the requested feature.
    #[error("Feature `{feature}` is not supported by API version {version}")]
    UnsupportedFeature {
        /// Feature name
        feature: String,
        /// API version in use
        version: String,
    },
}

/// Specialized result type for CloudConnexa operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for serialization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Optional request ID for tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error detail structure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Troubleshooting hint
    pub hint: &'static str,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Error {
    /// Creates a network error that represents an elapsed timeout or deadline.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            timeout: true,
            request_id: None,
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            message: message.into(),
            request_id: None,
        }
    }

    /// Creates a circuit-open error for an endpoint group.
    #[must_use]
    pub fn circuit_open(endpoint_group: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            endpoint_group: endpoint_group.into(),
            request_id: None,
        }
    }

    /// Request id of the call that failed, for errors raised by a call.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Authentication { request_id, .. }
            | Self::Validation { request_id, .. }
            | Self::ResourceNotFound { request_id, .. }
            | Self::RateLimit { request_id, .. }
            | Self::Server { request_id, .. }
            | Self::Network { request_id, .. }
            | Self::ServiceUnavailable { request_id, .. } => request_id.as_deref(),
            Self::Configuration(_) | Self::Decode(_) | Self::UnsupportedFeature { .. } => None,
        }
    }

    /// Attach the id of the call that raised this error. An id already present is kept.
    #[must_use]
    pub fn with_request_id(mut self, id: &str) -> Self {
        match &mut self {
            Self::Authentication { request_id, .. }
            | Self::Validation { request_id, .. }
            | Self::ResourceNotFound { request_id, .. }
            | Self::RateLimit { request_id, .. }
            | Self::Server { request_id, .. }
            | Self::Network { request_id, .. }
            | Self::ServiceUnavailable { request_id, .. } => {
                request_id.get_or_insert_with(|| id.to_string());
            }
            Self::Configuration(_) | Self::Decode(_) | Self::UnsupportedFeature { .. } => {}
        }
        self
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Server { .. } => "SERVER_ERROR",
            Self::Network { timeout: true, .. } => "TIMEOUT",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Decode(_) => "DECODE_ERROR",
            Self::UnsupportedFeature { .. } => "UNSUPPORTED_FEATURE",
        }
    }

    /// Returns the HTTP status the error was derived from, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } => *status,
            Self::Validation { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::ResourceNotFound { .. } => Some(404),
            Self::RateLimit { .. } => Some(429),
            _ => None,
        }
    }

    /// Returns the server-provided error code, if any.
    #[must_use]
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Authentication { code, .. }
            | Self::Validation { code, .. }
            | Self::Server { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns a short troubleshooting hint for the error.
    #[must_use]
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Configuration(_) => {
                "Check api_url, client_id and client_secret; api_url must be an https URL"
            }
            Self::Authentication {
                requires_reauth: true,
                ..
            } => "Verify the client credentials and their API permissions",
            Self::Authentication { .. } => {
                "Token endpoint was unreachable; the call can be retried later"
            }
            Self::Validation { .. } => "Inspect field_errors and correct the request payload",
            Self::ResourceNotFound { .. } => "Confirm the identifier exists in this account",
            Self::RateLimit { .. } => "Wait for retry_after before sending more requests",
            Self::Server {
                is_transient: true,
                ..
            } => "The API is temporarily degraded; retry later or use a fallback",
            Self::Server { .. } => "The API failed to process the request; contact support if it persists",
            Self::Network { timeout: true, .. } => {
                "Increase read_timeout or the request deadline, or check connectivity"
            }
            Self::Network { .. } => "Check DNS, TLS and network connectivity to the API host",
            Self::ServiceUnavailable { .. } => {
                "Circuit breaker is open; wait for recovery_timeout or use a fallback"
            }
            Self::Decode(_) => "The response shape did not match the selected API version",
            Self::UnsupportedFeature { .. } => "Select an API version that supports the feature",
        }
    }

    /// Returns true if the pipeline would have retried this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. }
                | Self::Server { .. }
                | Self::Network { .. }
                | Self::Authentication {
                    requires_reauth: false,
                    ..
                }
        )
    }

    /// Returns true if the caller has to obtain new credentials.
    #[must_use]
    pub const fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::Authentication {
                requires_reauth: true,
                ..
            }
        )
    }

    /// Returns the server-directed retry delay for rate limit errors.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Converts the error into an `ErrorResponse` carrying the call's request id.
    #[must_use]
    pub fn into_error_response(self) -> ErrorResponse {
        let request_id = self.request_id().map(str::to_string);
        self.into_error_response_with_id(request_id)
    }

    /// Converts the error into an `ErrorResponse` with an explicit request ID.
    #[must_use]
    pub fn into_error_response_with_id(self, request_id: Option<String>) -> ErrorResponse {
        let details = match &self {
            Self::Validation { field_errors, .. } if !field_errors.is_empty() => {
                serde_json::to_value(field_errors).ok()
            }
            Self::RateLimit {
                retry_after: Some(delay),
                ..
            } => Some(serde_json::json!({ "retry_after_secs": delay.as_secs_f64() })),
            _ => None,
        };

        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                hint: self.hint(),
                details,
            },
            request_id,
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Server {
                    is_transient: false,
                    ..
                }
                | Self::Decode(_)
        )
    }
}

// Conversions from external error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Configuration(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network {
                message: err.to_string(),
                timeout: err.is_timeout(),
                request_id: None,
            }
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration(format!("Invalid URL: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Payloads rejected locally surface like a server-side 422.
impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        let field_errors = err
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let messages = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or_else(|| e.code.to_string(), ToString::to_string)
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();

        Self::Validation {
            message: err.to_string(),
            status: 422,
            code: Some("invalid_payload".to_string()),
            field_errors,
            request_id: None,
        }
    }
}
