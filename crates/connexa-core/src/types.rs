//! Core request pipeline types.
//!
//! This module provides the resource kinds the API exposes, the transport-neutral
//! request descriptor built by version strategies, and the raw response handed back
//! by the executor.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::version::ApiVersion;

/// Resource kinds managed through the API.
///
/// Each kind is also an endpoint group: it owns one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// WPC networks
    Network,
    /// Users
    User,
    /// User groups
    UserGroup,
    /// DNS records
    DnsRecord,
    /// IP services
    IpService,
}

impl ResourceKind {
    /// Returns the collection segment used in API paths.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Network => "networks",
            Self::User => "users",
            Self::UserGroup => "user-groups",
            Self::DnsRecord => "dns-records",
            Self::IpService => "ip-services",
        }
    }

    /// Returns all resource kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Network,
            Self::User,
            Self::UserGroup,
            Self::DnsRecord,
            Self::IpService,
        ]
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.name() == s || kind.name().replace('-', "_") == s)
            .ok_or_else(|| Error::Configuration(format!("Unknown resource kind: {s}")))
    }
}

/// Transport-neutral description of one logical API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: Method,
    /// Path below `{api_url}/api/{version}/`
    pub path: String,
    /// API version segment to target
    pub version: ApiVersion,
    /// Endpoint group the call is accounted to
    pub kind: ResourceKind,
    /// Query pairs
    pub query: Vec<(&'static str, String)>,
    /// JSON body
    pub body: Option<serde_json::Value>,
    /// Whether repeating the call is free of extra side effects
    pub idempotent: bool,
    /// Overall deadline for the call, including retries
    pub deadline: Option<Duration>,
}

impl RequestDescriptor {
    /// Create a descriptor; idempotency is derived from the method.
    #[must_use]
    pub fn new(method: Method, kind: ResourceKind, version: ApiVersion, path: impl Into<String>) -> Self {
        let idempotent = is_idempotent(&method);
        Self {
            method,
            path: path.into(),
            version,
            kind,
            query: Vec::new(),
            body: None,
            idempotent,
            deadline: None,
        }
    }

    /// Set the query pairs.
    #[must_use]
    pub fn with_query(mut self, query: Vec<(&'static str, String)>) -> Self {
        self.query = query;
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Override the idempotency flag.
    #[must_use]
    pub const fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Set an overall deadline for the call.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Full path relative to the API root, including the version segment.
    #[must_use]
    pub fn versioned_path(&self) -> String {
        format!(
            "api/{}/{}",
            self.version.segment(),
            self.path.trim_start_matches('/')
        )
    }
}

/// GET, PUT and DELETE can be repeated safely; POST and PATCH cannot.
#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

/// Successful (2xx) response returned by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status
    pub status: u16,
    /// Raw body
    pub body: Vec<u8>,
    /// Request ID sent with the call
    pub request_id: String,
}

impl ApiResponse {
    /// Returns true if the body is empty (e.g. `204 No Content`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status == 204 || self.body.iter().all(u8::is_ascii_whitespace)
    }

    /// Decode the body as JSON; an empty body decodes from `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.is_empty() {
            serde_json::from_value(serde_json::Value::Null)
                .map_err(|err| Error::Decode(format!("Failed to parse empty response: {err}")))
        } else {
            serde_json::from_slice(&self.body)
                .map_err(|err| Error::Decode(format!("Failed to parse response: {err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_names() {
        assert_eq!(ResourceKind::Network.name(), "networks");
        assert_eq!(ResourceKind::DnsRecord.to_string(), "dns-records");
        assert_eq!(ResourceKind::all().len(), 5);
    }

    #[test]
    fn test_resource_kind_from_str() {
        assert_eq!(
            "user-groups".parse::<ResourceKind>().unwrap(),
            ResourceKind::UserGroup
        );
        assert_eq!(
            "ip_services".parse::<ResourceKind>().unwrap(),
            ResourceKind::IpService
        );
        assert!(matches!(
            "routers".parse::<ResourceKind>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_descriptor_idempotency_follows_method() {
        let get = RequestDescriptor::new(Method::GET, ResourceKind::User, ApiVersion::V1_0, "users");
        assert!(get.idempotent);

        let post =
            RequestDescriptor::new(Method::POST, ResourceKind::User, ApiVersion::V1_0, "users");
        assert!(!post.idempotent);
        assert!(post.with_idempotent(true).idempotent);
    }

    #[test]
    fn test_versioned_path() {
        let descriptor = RequestDescriptor::new(
            Method::GET,
            ResourceKind::DnsRecord,
            ApiVersion::V1_1_0,
            "/dns-records/abc",
        );
        assert_eq!(descriptor.versioned_path(), "api/v1.1.0/dns-records/abc");
    }

    #[test]
    fn test_response_json_empty_body() {
        let response = ApiResponse {
            status: 204,
            body: Vec::new(),
            request_id: "r".into(),
        };
        let value: Option<serde_json::Value> = response.json().unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_response_json_invalid() {
        let response = ApiResponse {
            status: 200,
            body: b"{nope".to_vec(),
            request_id: "r".into(),
        };
        assert!(matches!(
            response.json::<serde_json::Value>(),
            Err(Error::Decode(_))
        ));
    }
}
