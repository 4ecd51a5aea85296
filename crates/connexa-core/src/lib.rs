//! # connexa-core
//!
//! Resilient, version-aware request pipeline for the CloudConnexa API.
//!
//! A logical resource operation is turned into a [`types::RequestDescriptor`] by a
//! version [`version::Strategy`], executed by the [`executor::RequestExecutor`]
//! (circuit breaker, OAuth2 token, HTTP call, classification, retry), and the raw
//! response is normalized back into a version-independent model.
//!
//! ## Modules
//!
//! - [`error`] - Typed error taxonomy and serializable error responses
//! - [`config`] - Client configuration, environment loading and validation
//! - [`client`] - HTTP transport settings
//! - [`types`] - Resource kinds, request descriptors and raw responses
//! - [`query`] - Query parameter builder
//! - [`classify`] - Failure classification
//! - [`retry`] - Retry policy and backoff
//! - [`breaker`] - Circuit breakers per endpoint group
//! - [`auth`] - OAuth2 client-credentials tokens
//! - [`executor`] - Request execution and observer events
//! - [`version`] - API versions, feature matrix and version adapters

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod breaker;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod query;
pub mod retry;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use config::ConnexaConfig;
pub use error::{Error, Result};
pub use executor::{Execute, RequestExecutor};
pub use types::{ApiResponse, RequestDescriptor, ResourceKind};
pub use version::{ApiVersion, VersionAdapterRegistry};
