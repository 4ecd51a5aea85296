//! Failure classification.
//!
//! [`classify`] maps the raw outcome of one attempt (an HTTP status with its body, a
//! transport failure, or a local misconfiguration) onto an [`ErrorClassification`].
//! The classification drives retries and the circuit breaker; [`Failure::into_error`]
//! turns the final one into the typed [`Error`] callers see.

use crate::error::Error;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Failure category of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// 401/403. `retryable` is true only for 401, which may be cured by a token refresh.
    Authentication {
        /// Whether a token refresh and one retry may help
        retryable: bool,
    },
    /// 400, 422 and any other unclassified 4xx.
    Validation,
    /// 1xx or 3xx where a final 2xx was expected.
    UnexpectedStatus,
    /// 404.
    NotFound,
    /// 429, optionally with a server-directed delay.
    RateLimit {
        /// Delay from `Retry-After` or the body, overriding computed backoff
        retry_after: Option<Duration>,
    },
    /// 502, 503, 504.
    ServerTransient,
    /// Any other 5xx.
    ServerPermanent,
    /// No response was received.
    Network {
        /// True when the request may already have reached the server (read
        /// timeout, I/O failure mid-exchange). False for connect, TLS and DNS failures.
        in_flight: bool,
    },
    /// Local misconfiguration; never reaches the network.
    Configuration,
}

impl ErrorClassification {
    /// Whether this class may be retried at all.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Authentication { retryable } => *retryable,
            Self::RateLimit { .. }
            | Self::ServerTransient
            | Self::ServerPermanent
            | Self::Network { .. } => true,
            Self::Validation | Self::UnexpectedStatus | Self::NotFound | Self::Configuration => {
                false
            }
        }
    }

    /// Whether the failure counts against the endpoint group's circuit breaker.
    #[must_use]
    pub const fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::ServerTransient | Self::ServerPermanent | Self::Network { .. }
        )
    }

    /// True when the request cannot have taken effect server-side, so even a
    /// non-idempotent call may be repeated.
    #[must_use]
    pub const fn precedes_side_effects(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::RateLimit { .. }
                | Self::Network { in_flight: false }
        )
    }

    /// Server-directed delay, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short label used in logs and events.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::Validation => "validation",
            Self::UnexpectedStatus => "unexpected_status",
            Self::NotFound => "not_found",
            Self::RateLimit { .. } => "rate_limit",
            Self::ServerTransient => "server_transient",
            Self::ServerPermanent => "server_permanent",
            Self::Network { .. } => "network",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure observed before any HTTP response arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Connect or read timeout, or an elapsed call deadline
    Timeout(String),
    /// TCP connection failure
    Connect(String),
    /// TLS handshake or certificate failure
    Tls(String),
    /// Name resolution failure
    Dns(String),
    /// Any other I/O failure while sending or reading
    Other(String),
}

impl TransportFailure {
    /// Categorise a reqwest error by walking its source chain.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let mut detail = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(inner) = source {
            detail.push_str(": ");
            detail.push_str(&inner.to_string());
            source = inner.source();
        }

        let lowered = detail.to_ascii_lowercase();
        if err.is_connect() && err.is_timeout() {
            Self::Connect(detail)
        } else if err.is_timeout() {
            Self::Timeout(detail)
        } else if lowered.contains("dns") || lowered.contains("failed to lookup address") {
            Self::Dns(detail)
        } else if lowered.contains("certificate")
            || lowered.contains("tls")
            || lowered.contains("handshake")
        {
            Self::Tls(detail)
        } else if err.is_connect() {
            Self::Connect(detail)
        } else {
            Self::Other(detail)
        }
    }

    /// Message describing the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Timeout(m) | Self::Connect(m) | Self::Tls(m) | Self::Dns(m) | Self::Other(m) => m,
        }
    }

    /// True for timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// True unless the failure happened before a connection was established.
    #[must_use]
    pub const fn may_have_reached_server(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Other(_))
    }
}

/// Parsed non-2xx body.
///
/// Understands `{error, error_description}`, `{error: {code, message, details}}`,
/// `{message}` and field-level `{errors: {field: [messages]}}` shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiErrorBody {
    /// Machine-readable error code
    pub error: Option<String>,
    /// Human-readable description
    pub description: Option<String>,
    /// Field-level validation messages
    pub field_errors: BTreeMap<String, Vec<String>>,
    /// `retry_after` carried in the body, in seconds
    pub retry_after: Option<Duration>,
    /// Raw body text (lossy UTF-8)
    pub raw: String,
}

impl ApiErrorBody {
    /// Parse an error body; non-JSON bodies are kept as raw text only.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(bytes).trim().to_string();
        let mut body = Self {
            raw,
            ..Self::default()
        };

        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(bytes) else {
            return body;
        };

        match map.get("error") {
            Some(Value::String(code)) => body.error = Some(code.clone()),
            Some(Value::Object(nested)) => {
                body.error = nested.get("code").and_then(value_to_string);
                body.description = nested.get("message").and_then(value_to_string);
                if let Some(details) = nested.get("details") {
                    collect_field_errors(details, &mut body.field_errors);
                }
                body.retry_after = nested.get("retry_after").and_then(value_to_secs);
            }
            _ => {}
        }

        if let Some(description) = map
            .get("error_description")
            .or_else(|| map.get("message"))
            .and_then(value_to_string)
        {
            body.description.get_or_insert(description);
        }
        if let Some(errors) = map.get("errors") {
            collect_field_errors(errors, &mut body.field_errors);
        }
        if body.retry_after.is_none() {
            body.retry_after = map
                .get("retry_after")
                .or_else(|| map.get("retryAfter"))
                .and_then(value_to_secs);
        }

        body
    }

    /// Best human-readable message available.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.description
            .clone()
            .or_else(|| self.error.clone())
            .or_else(|| (!self.raw.is_empty()).then(|| self.raw.clone()))
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_secs(value: &Value) -> Option<Duration> {
    let secs = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Duration::try_from_secs_f64(secs).ok()
}

fn collect_field_errors(value: &Value, into: &mut BTreeMap<String, Vec<String>>) {
    match value {
        Value::Object(fields) => {
            for (field, messages) in fields {
                let entry = into.entry(field.clone()).or_default();
                match messages {
                    Value::Array(items) => entry.extend(items.iter().filter_map(value_to_string)),
                    other => entry.extend(value_to_string(other)),
                }
            }
        }
        // `[{ "field": "name", "message": "..." }]`
        Value::Array(items) => {
            for item in items {
                let field = item.get("field").and_then(value_to_string);
                let message = item.get("message").and_then(value_to_string);
                if let (Some(field), Some(message)) = (field, message) {
                    into.entry(field).or_default().push(message);
                }
            }
        }
        _ => {}
    }
}

/// Parse a `Retry-After` header given in seconds. HTTP-date values are ignored.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Raw outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// No response was received
    Transport(TransportFailure),
    /// A non-2xx response
    Response {
        /// HTTP status
        status: u16,
        /// `Retry-After` header, in seconds
        retry_after: Option<Duration>,
        /// Parsed body
        body: ApiErrorBody,
    },
    /// Local misconfiguration detected before sending
    Configuration(String),
}

impl Failure {
    /// Capture a non-2xx response.
    #[must_use]
    pub fn from_response(status: u16, headers: &HeaderMap, body: &[u8]) -> Self {
        Self::Response {
            status,
            retry_after: parse_retry_after(headers),
            body: ApiErrorBody::parse(body),
        }
    }

    /// Capture a transport error.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Configuration(err.to_string())
        } else {
            Self::Transport(TransportFailure::from_reqwest(err))
        }
    }

    /// HTTP status, if a response was received.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Convert the failure into the typed error for its classification.
    #[must_use]
    pub fn into_error(self, classification: ErrorClassification) -> Error {
        match self {
            Self::Configuration(message) => Error::Configuration(message),
            Self::Transport(failure) => Error::Network {
                timeout: failure.is_timeout(),
                message: failure.message().to_string(),
                request_id: None,
            },
            Self::Response {
                status,
                retry_after,
                body,
            } => {
                let message = body.message().unwrap_or_else(|| {
                    StatusCode::from_u16(status)
                        .ok()
                        .and_then(|s| s.canonical_reason())
                        .unwrap_or("unexpected status")
                        .to_string()
                });
                response_error(classification, status, message, retry_after, body)
            }
        }
    }
}

fn response_error(
    classification: ErrorClassification,
    status: u16,
    message: String,
    header_retry_after: Option<Duration>,
    body: ApiErrorBody,
) -> Error {
    match classification {
        ErrorClassification::Authentication { .. } => Error::Authentication {
            message,
            status: Some(status),
            code: body.error,
            requires_reauth: true,
            request_id: None,
        },
        ErrorClassification::NotFound => Error::not_found(message),
        ErrorClassification::RateLimit { retry_after } => Error::RateLimit {
            message,
            retry_after: retry_after.or(header_retry_after),
            request_id: None,
        },
        ErrorClassification::ServerTransient | ErrorClassification::ServerPermanent => {
            Error::Server {
                status,
                message,
                code: body.error,
                is_transient: classification == ErrorClassification::ServerTransient,
                request_id: None,
            }
        }
        ErrorClassification::UnexpectedStatus => Error::Server {
            status,
            message: format!("Unexpected HTTP status {status}: {message}"),
            code: body.error,
            is_transient: false,
            request_id: None,
        },
        ErrorClassification::Network { .. } => Error::Network {
            message,
            timeout: false,
            request_id: None,
        },
        ErrorClassification::Configuration => Error::Configuration(message),
        ErrorClassification::Validation => Error::Validation {
            message,
            status,
            code: body.error,
            field_errors: body.field_errors,
            request_id: None,
        },
    }
}

/// Classify a failed attempt.
#[must_use]
pub fn classify(failure: &Failure) -> ErrorClassification {
    match failure {
        Failure::Configuration(_) => ErrorClassification::Configuration,
        Failure::Transport(failure) => ErrorClassification::Network {
            in_flight: failure.may_have_reached_server(),
        },
        Failure::Response {
            status,
            retry_after,
            body,
        } => match *status {
            401 => ErrorClassification::Authentication { retryable: true },
            403 => ErrorClassification::Authentication { retryable: false },
            404 => ErrorClassification::NotFound,
            429 => ErrorClassification::RateLimit {
                retry_after: retry_after.or(body.retry_after),
            },
            502..=504 => ErrorClassification::ServerTransient,
            500..=599 => ErrorClassification::ServerPermanent,
            // 400, 422 and every other client error
            400..=499 => ErrorClassification::Validation,
            // Informational, redirect or out-of-range codes
            _ => ErrorClassification::UnexpectedStatus,
        },
    }
}
