//! Typed CloudConnexa client.
//!
//! [`ConnexaClient`] detects the API version once, then serves every resource through a
//! [`ResourceService`] that runs the version's strategy over the shared request executor.
//! Callers see the same models and the same `get`/`list` semantics on every version.

#![deny(missing_docs)]

pub mod client;
pub mod models;

pub use client::{detect_version, ConnexaClient, ConnexaClientBuilder, ResourceService};
pub use connexa_core::version::{Feature, Page};
pub use connexa_core::{ApiVersion, ConnexaConfig, Error, ResourceKind};
pub use models::{
    CreateNetworkRequest, CreateUserRequest, DnsRecord, DnsRecordRequest, IpService,
    IpServiceRequest, ListQuery, Network, NetworkListParams, PageParams, Resource,
    UpdateNetworkRequest, UpdateUserRequest, User, UserGroup, UserGroupRequest, UserListParams,
};

/// Convenient result alias sharing the `connexa-core` error type.
pub type Result<T> = connexa_core::Result<T>;
