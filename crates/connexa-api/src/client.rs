//! Asynchronous CloudConnexa client implementation.

use crate::models::{DnsRecord, IpService, ListQuery, Network, Resource, User, UserGroup};
use crate::Result;
use connexa_core::breaker::CircuitState;
use connexa_core::executor::ExecutorObserver;
use connexa_core::query::DEFAULT_PAGE_SIZE;
use connexa_core::version::{Adapted, Feature, Operation, Page, Strategy, VersionedModel};
use connexa_core::{
    ApiVersion, ConnexaConfig, Error, RequestExecutor, ResourceKind, VersionAdapterRegistry,
};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use validator::Validate;

/// Path probed to detect `v1.1.0` support.
pub const VERSION_PROBE_PATH: &str = "api/v1.1.0/version";

/// Builder for [`ConnexaClient`].
pub struct ConnexaClientBuilder {
    config: ConnexaConfig,
    registry: VersionAdapterRegistry,
    observer: Option<Arc<dyn ExecutorObserver>>,
}

impl ConnexaClientBuilder {
    /// Create a new builder from configuration.
    #[must_use]
    pub fn new(config: ConnexaConfig) -> Self {
        Self {
            config,
            registry: VersionAdapterRegistry::standard(),
            observer: None,
        }
    }

    /// Create a builder from `CLOUDCONNEXA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ConnexaConfig::from_env()?))
    }

    /// Replace the version adapter registry.
    #[must_use]
    pub fn with_registry(mut self, registry: VersionAdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Override a single strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.registry.register(strategy);
        self
    }

    /// Publish executor events to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExecutorObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the client, detecting the API version unless one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid configuration. Version detection
    /// itself never fails; it falls back to `1.0`.
    pub async fn build(self) -> Result<ConnexaClient> {
        let mut executor = RequestExecutor::from_config(&self.config)?;
        if let Some(observer) = self.observer {
            executor = executor.with_observer(observer);
        }

        let version = detect_version(
            executor.http(),
            executor.base_url(),
            self.config.api_version,
            self.config.http_config().read_timeout,
        )
        .await;

        Ok(ConnexaClient {
            executor: Arc::new(executor),
            registry: Arc::new(self.registry),
            version,
        })
    }
}

/// Asynchronous client for the CloudConnexa API.
#[derive(Clone)]
pub struct ConnexaClient {
    executor: Arc<RequestExecutor>,
    registry: Arc<VersionAdapterRegistry>,
    version: ApiVersion,
}

impl std::fmt::Debug for ConnexaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnexaClient")
            .field("base_url", &self.executor.base_url().as_str())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl ConnexaClient {
    /// Construct a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid configuration.
    pub async fn new(config: ConnexaConfig) -> Result<Self> {
        ConnexaClientBuilder::new(config).build().await
    }

    /// Construct a client from `CLOUDCONNEXA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a required variable is missing or invalid.
    pub async fn from_env() -> Result<Self> {
        ConnexaClientBuilder::from_env()?.build().await
    }

    /// Start building a client.
    #[must_use]
    pub fn builder(config: ConnexaConfig) -> ConnexaClientBuilder {
        ConnexaClientBuilder::new(config)
    }

    /// API version in use.
    #[must_use]
    pub const fn api_version(&self) -> ApiVersion {
        self.version
    }

    /// Whether the API version in use offers `feature`.
    #[must_use]
    pub const fn supports(&self, feature: Feature) -> bool {
        self.version.supports(feature)
    }

    /// Access the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.executor.base_url()
    }

    /// Shared request executor.
    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Fetch an access token now instead of on the first call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the token endpoint rejects the credentials
    /// or cannot be reached.
    pub async fn authenticate(&self) -> Result<()> {
        let token = self.executor.tokens().get_valid_token().await?;
        info!(expires_in = ?token.expires_in(), "authenticated");
        Ok(())
    }

    /// Circuit breaker state for a resource kind.
    #[must_use]
    pub fn circuit_state(&self, kind: ResourceKind) -> Option<CircuitState> {
        self.executor.circuit_state(kind)
    }

    /// Close the circuit breaker for a resource kind, e.g. after an operator has
    /// confirmed the backend recovered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no breaker exists for `kind`.
    pub fn reset_circuit(&self, kind: ResourceKind) -> Result<()> {
        self.executor.reset_circuit(kind)?;
        info!(resource = %kind, "circuit reset by caller");
        Ok(())
    }

    /// Strategy used for `kind` on the current version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no strategy is registered.
    pub fn strategy(&self, kind: ResourceKind) -> Result<Strategy> {
        self.registry.resolve(kind, self.version)
    }

    /// Network operations.
    #[must_use]
    pub fn networks(&self) -> ResourceService<'_, Network> {
        ResourceService::new(self)
    }

    /// User operations.
    #[must_use]
    pub fn users(&self) -> ResourceService<'_, User> {
        ResourceService::new(self)
    }

    /// User group operations.
    #[must_use]
    pub fn user_groups(&self) -> ResourceService<'_, UserGroup> {
        ResourceService::new(self)
    }

    /// DNS record operations.
    #[must_use]
    pub fn dns_records(&self) -> ResourceService<'_, DnsRecord> {
        ResourceService::new(self)
    }

    /// IP service operations.
    #[must_use]
    pub fn ip_services(&self) -> ResourceService<'_, IpService> {
        ResourceService::new(self)
    }
}

/// Typed CRUD handle for one resource kind.
///
/// Every call resolves the version strategy, runs it through the executor and
/// decodes the normalized records into `R`. When a request deadline is configured
/// it bounds the whole operation, including every page of an emulated get or of
/// [`ResourceService::list_all`].
pub struct ResourceService<'a, R> {
    client: &'a ConnexaClient,
    resource: PhantomData<fn() -> R>,
}

impl<'a, R: Resource> ResourceService<'a, R> {
    fn new(client: &'a ConnexaClient) -> Self {
        Self {
            client,
            resource: PhantomData,
        }
    }

    /// List one page.
    ///
    /// # Errors
    ///
    /// Returns the executor's terminal error or [`Error::Decode`].
    pub async fn list(&self, params: &R::ListParams) -> Result<Page<R>> {
        let op = Operation::List {
            query: params.to_query(),
        };
        self.run(&op)
            .await?
            .into_page()?
            .try_map(VersionedModel::into_model)
    }

    /// List every page, starting from the first.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, [`Error::Decode`] if the API does not
    /// advance through pages, and a timeout once the request deadline elapses.
    pub async fn list_all(&self, params: &R::ListParams) -> Result<Vec<R>> {
        self.within_deadline(self.collect_pages(params)).await
    }

    async fn collect_pages(&self, params: &R::ListParams) -> Result<Vec<R>> {
        let size = params.page_size().unwrap_or(DEFAULT_PAGE_SIZE);
        let mut items = Vec::new();
        let mut page_number = 0_u32;
        loop {
            let mut query = params.to_query();
            query.set_page(page_number, size);
            let page = self
                .dispatch(&Operation::List { query })
                .await?
                .into_page()?;
            let next = page.next_page(page_number);
            for record in page.items {
                items.push(record.into_model()?);
            }
            match next {
                Ok(Some(next)) => page_number = next,
                Ok(None) => return Ok(items),
                Err(err) => {
                    warn!(resource = %R::KIND, page = page_number, error = %err, "abandoning listing");
                    return Err(err);
                }
            }
        }
    }

    /// Fetch one record; `None` when no record has this id.
    ///
    /// # Errors
    ///
    /// Returns the executor's terminal error or [`Error::Decode`].
    pub async fn get(&self, id: &str) -> Result<Option<R>> {
        let op = Operation::Get { id: id.to_string() };
        self.run(&op)
            .await?
            .into_record()?
            .map(VersionedModel::into_model)
            .transpose()
    }

    /// Create a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] before any request if the payload is invalid.
    pub async fn create(&self, request: &R::Create) -> Result<R> {
        request.validate()?;
        let op = Operation::Create {
            body: serde_json::to_value(request)?,
        };
        self.expect_record(&op).await
    }

    /// Replace a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] before any request if the payload is invalid.
    pub async fn update(&self, id: &str, request: &R::Update) -> Result<R> {
        request.validate()?;
        let op = Operation::Update {
            id: id.to_string(),
            body: serde_json::to_value(request)?,
        };
        self.expect_record(&op).await
    }

    /// Delete a record.
    ///
    /// # Errors
    ///
    /// Returns the executor's terminal error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        match self.run(&Operation::Delete { id: id.to_string() }).await? {
            Adapted::Deleted => Ok(()),
            other => Err(Error::Decode(format!("Unexpected delete result: {other:?}"))),
        }
    }

    async fn expect_record(&self, op: &Operation) -> Result<R> {
        self.run(op)
            .await?
            .into_record()?
            .ok_or_else(|| Error::Decode(format!("{} returned no {} record", op.name(), R::KIND)))?
            .into_model()
    }

    async fn run(&self, op: &Operation) -> Result<Adapted> {
        self.within_deadline(self.dispatch(op)).await
    }

    async fn dispatch(&self, op: &Operation) -> Result<Adapted> {
        let strategy = self.client.strategy(R::KIND)?;
        debug!(
            resource = %R::KIND,
            operation = op.name(),
            version = %strategy.version,
            "running operation"
        );
        strategy.run(&*self.client.executor, op).await
    }

    async fn within_deadline<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match self.client.executor.deadline() {
            Some(deadline) => tokio::time::timeout(deadline, operation)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::timeout(format!(
                        "{} operation deadline of {deadline:?} elapsed",
                        R::KIND
                    )))
                }),
            None => operation.await,
        }
    }
}

/// Pick the API version.
///
/// `preferred` wins when set. Otherwise `GET {api_url}/api/v1.1.0/version` answering
/// exactly 200 selects `1.1.0`; any other status (other 2xx included) or a transport
/// failure falls back to `1.0`.
pub async fn detect_version(
    http: &reqwest::Client,
    api_url: &Url,
    preferred: Option<ApiVersion>,
    timeout: Duration,
) -> ApiVersion {
    if let Some(version) = preferred {
        info!(%version, "using configured API version");
        return version;
    }

    let probe = match api_url.join(VERSION_PROBE_PATH) {
        Ok(url) => url,
        Err(err) => {
            debug!(error = %err, "cannot build version probe URL");
            return ApiVersion::V1_0;
        }
    };

    match http.get(probe).timeout(timeout).send().await {
        Ok(response) if response.status() == reqwest::StatusCode::OK => {
            info!("detected API version 1.1.0");
            ApiVersion::V1_1_0
        }
        Ok(response) => {
            info!(status = response.status().as_u16(), "falling back to API version 1.0");
            ApiVersion::V1_0
        }
        Err(err) => {
            debug!(error = %err, "version probe failed");
            info!("falling back to API version 1.0");
            ApiVersion::V1_0
        }
    }
}
