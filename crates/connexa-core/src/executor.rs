//! Request execution.
//!
//! [`RequestExecutor`] runs one logical call through the pipeline:
//!
//! 1. ask the endpoint group's circuit breaker for a permit,
//! 2. obtain a valid token,
//! 3. send the request with a bearer credential and the call's `X-Request-Id`,
//! 4. on failure classify it, settle the breaker permit and ask the retry policy
//!    whether to back off and try again.
//!
//! Only the final, typed [`Error`] leaves the executor. The optional per-call deadline
//! covers every suspension point (token refresh, HTTP round trip, backoff sleep).

use crate::auth::TokenManager;
use crate::breaker::{CircuitBreakers, CircuitState};
use crate::classify::{classify, ErrorClassification, Failure};
use crate::config::ConnexaConfig;
use crate::error::{Error, Result};
use crate::retry::{RetryContext, RetryPolicy};
use crate::types::{ApiResponse, RequestDescriptor, ResourceKind};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Header carrying the per-call request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Anything that can run a request descriptor to a successful response.
///
/// Strategies and resource services depend on this seam rather than on the concrete
/// executor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Execute: Send + Sync {
    /// Run one logical call, retries included.
    async fn execute(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse>;
}

/// Events published while executing calls.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    /// An attempt failed and the call will retry after `delay`.
    Retrying {
        /// Request id of the logical call
        request_id: String,
        /// Endpoint group
        kind: ResourceKind,
        /// Zero-based index of the failed attempt
        attempt: u32,
        /// Backoff before the next attempt
        delay: Duration,
        /// Classification of the failure
        classification: ErrorClassification,
    },
    /// The circuit breaker rejected the call without a network request.
    CircuitRejected {
        /// Request id of the logical call
        request_id: String,
        /// Endpoint group
        kind: ResourceKind,
    },
    /// The call failed terminally.
    Terminal {
        /// Request id of the logical call
        request_id: String,
        /// Endpoint group
        kind: ResourceKind,
        /// Error returned to the caller
        error: Error,
    },
}

/// Receives [`ExecutorEvent`]s. Implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait ExecutorObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &ExecutorEvent);
}

/// Runs request descriptors against the API.
pub struct RequestExecutor {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<TokenManager>,
    breakers: Arc<CircuitBreakers>,
    retry: RetryPolicy,
    read_timeout: Option<Duration>,
    deadline: Option<Duration>,
    observer: Option<Arc<dyn ExecutorObserver>>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .field("read_timeout", &self.read_timeout)
            .field("deadline", &self.deadline)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Create an executor sending requests below `base_url`.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        tokens: Arc<TokenManager>,
        breakers: Arc<CircuitBreakers>,
    ) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
            tokens,
            breakers,
            retry: RetryPolicy::new(),
            read_timeout: None,
            deadline: None,
            observer: None,
        }
    }

    /// Build the executor and its collaborators from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid configuration; no network call is made.
    pub fn from_config(config: &ConnexaConfig) -> Result<Self> {
        config.check()?;
        let http_config = config.http_config();
        let http = http_config.build_http_client()?;
        let tokens = Arc::new(TokenManager::from_config(config, http.clone())?);
        let breakers = Arc::new(CircuitBreakers::new(config.breaker_config()));

        let mut executor = Self::new(http, config.parse_api_url()?, tokens, breakers)
            .with_retry_policy(config.retry_policy())
            .with_read_timeout(http_config.read_timeout);
        if let Some(deadline) = config.request_deadline() {
            executor = executor.with_deadline(deadline);
        }
        Ok(executor)
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the default overall deadline for calls whose descriptor has none.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Publish events to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExecutorObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// API root URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Shared HTTP client.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Token manager.
    #[must_use]
    pub const fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Default overall deadline for calls whose descriptor has none.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Breaker state for an endpoint group.
    #[must_use]
    pub fn circuit_state(&self, kind: ResourceKind) -> Option<CircuitState> {
        self.breakers.state(kind)
    }

    /// Close the breaker for an endpoint group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no breaker exists for `kind`.
    pub fn reset_circuit(&self, kind: ResourceKind) -> Result<()> {
        self.breakers.reset(kind)
    }

    async fn run(&self, descriptor: &RequestDescriptor, request_id: &str) -> Result<ApiResponse> {
        let url = self.base_url.join(&descriptor.versioned_path())?;
        let breaker = self.breakers.get(descriptor.kind)?;
        let mut attempt = 0_u32;
        let mut auth_refreshed = false;

        loop {
            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(err) => {
                    warn!(
                        resource = %descriptor.kind,
                        request_id,
                        attempt,
                        "circuit open, rejecting request"
                    );
                    self.emit(ExecutorEvent::CircuitRejected {
                        request_id: request_id.to_string(),
                        kind: descriptor.kind,
                    });
                    return Err(err);
                }
            };

            let token = match self.tokens.get_valid_token().await {
                Ok(token) => token,
                Err(err) if err.requires_reauth() => return Err(err),
                Err(err) => {
                    // The backend was never contacted; release the permit untouched.
                    drop(permit);
                    let ctx = self.retry.context(
                        attempt,
                        ErrorClassification::Network { in_flight: false },
                        descriptor.idempotent,
                        auth_refreshed,
                    );
                    if !self.retry.should_retry(&ctx) {
                        return Err(err);
                    }
                    self.back_off(descriptor, request_id, &ctx).await;
                    attempt += 1;
                    continue;
                }
            };

            info!(
                resource = %descriptor.kind,
                method = %descriptor.method,
                path = %url.path(),
                request_id,
                attempt,
                "sending request"
            );

            let failure = match self.send(descriptor, &url, token.access_token(), request_id).await {
                Ok(response) => {
                    permit.record_success();
                    debug!(request_id, status = response.status, "request succeeded");
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            let classification = classify(&failure);
            if classification.trips_breaker() {
                permit.record_failure();
            } else {
                permit.record_success();
            }

            let ctx = self.retry.context(
                attempt,
                classification,
                descriptor.idempotent,
                auth_refreshed,
            );
            if !self.retry.should_retry(&ctx) {
                return Err(failure.into_error(classification));
            }

            if matches!(classification, ErrorClassification::Authentication { .. }) {
                self.tokens.invalidate(&token);
                auth_refreshed = true;
            }
            self.back_off(descriptor, request_id, &ctx).await;
            attempt += 1;
        }
    }

    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        url: &Url,
        access_token: &str,
        request_id: &str,
    ) -> std::result::Result<ApiResponse, Failure> {
        let mut request = self
            .http
            .request(descriptor.method.clone(), url.clone())
            .bearer_auth(access_token)
            .header(REQUEST_ID_HEADER, request_id)
            .header(ACCEPT, "application/json");
        if let Some(timeout) = self.read_timeout {
            request = request.timeout(timeout);
        }
        if !descriptor.query.is_empty() {
            request = request.query(&descriptor.query);
        }
        if let Some(body) = &descriptor.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| Failure::from_transport(&err))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| Failure::from_transport(&err))?;

        if status.is_success() {
            Ok(ApiResponse {
                status: status.as_u16(),
                body: body.to_vec(),
                request_id: request_id.to_string(),
            })
        } else {
            Err(Failure::from_response(status.as_u16(), &headers, &body))
        }
    }

    async fn back_off(&self, descriptor: &RequestDescriptor, request_id: &str, ctx: &RetryContext) {
        let delay = self.retry.backoff(ctx);
        debug!(
            resource = %descriptor.kind,
            request_id,
            attempt = ctx.attempt,
            classification = %ctx.classification,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying after backoff"
        );
        self.emit(ExecutorEvent::Retrying {
            request_id: request_id.to_string(),
            kind: descriptor.kind,
            attempt: ctx.attempt,
            delay,
            classification: ctx.classification,
        });
        tokio::time::sleep(delay).await;
    }

    fn emit(&self, event: ExecutorEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

#[async_trait]
impl Execute for RequestExecutor {
    async fn execute(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse> {
        let request_id = Uuid::new_v4().to_string();
        let call = self.run(descriptor, &request_id);

        let result = match descriptor.deadline.or(self.deadline) {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::timeout(format!(
                        "Request deadline of {deadline:?} elapsed"
                    )))
                }),
            None => call.await,
        }
        .map_err(|err| err.with_request_id(&request_id));

        if let Err(err) = &result {
            if err.should_log() {
                error!(
                    resource = %descriptor.kind,
                    request_id = %request_id,
                    code = err.error_code(),
                    status = ?err.status_code(),
                    error = %err,
                    "request failed"
                );
            } else {
                warn!(
                    resource = %descriptor.kind,
                    request_id = %request_id,
                    code = err.error_code(),
                    status = ?err.status_code(),
                    "request failed"
                );
            }
            self.emit(ExecutorEvent::Terminal {
                request_id,
                kind: descriptor.kind,
                error: err.clone(),
            });
        }
        result
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerConfig;
    use crate::version::ApiVersion;
    use reqwest::Method;
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ExecutorEvent>>,
    }

    impl ExecutorObserver for Recorder {
        fn on_event(&self, event: &ExecutorEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn delays(&self) -> Vec<Duration> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|event| match event {
                    ExecutorEvent::Retrying { delay, .. } => Some(*delay),
                    _ => None,
                })
                .collect()
        }
    }

    fn fast_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(max_retries)
            .with_backoff_factor(Duration::from_millis(10))
            .with_backoff_max(Duration::from_secs(1))
            .with_jitter(false)
    }

    async fn mount_token(server: &MockServer, access_token: &str) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(server)
            .await;
    }

    fn executor(server: &MockServer, retry: RetryPolicy, threshold: u32) -> RequestExecutor {
        let http = reqwest::Client::new();
        let token_url = Url::parse(&format!("{}/oauth/token", server.uri())).unwrap();
        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            token_url,
            "client",
            SecretString::from("secret".to_string()),
        ));
        let breakers = Arc::new(CircuitBreakers::new(CircuitBreakerConfig::new(
            threshold,
            Duration::from_secs(60),
        )));
        RequestExecutor::new(http, Url::parse(&server.uri()).unwrap(), tokens, breakers)
            .with_retry_policy(retry)
    }

    fn list_networks() -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, ResourceKind::Network, ApiVersion::V1_1_0, "networks")
    }

    #[tokio::test]
    async fn test_sends_bearer_token_and_request_id() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .and(header("authorization", "Bearer tok-1"))
            .and(header_exists("x-request-id"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let response = executor(&server, fast_retries(0), 5)
            .execute(&list_networks().with_query(vec![("page", "2".to_string())]))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert!(Uuid::parse_str(&response.request_id).is_ok());
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(3)
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "n1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = Arc::new(Recorder::default());
        let executor = executor(&server, fast_retries(3), 10).with_observer(recorder.clone());
        let response = executor.execute(&list_networks()).await.unwrap();

        assert_eq!(response.json::<serde_json::Value>().unwrap()[0]["id"], "n1");
        assert_eq!(
            recorder.delays(),
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40)
            ]
        );
        assert_eq!(
            executor.circuit_state(ResourceKind::Network),
            Some(CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn test_mixed_transient_classes_are_retried() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let recorder = Arc::new(Recorder::default());
        let executor = executor(&server, fast_retries(3), 10).with_observer(recorder.clone());
        executor.execute(&list_networks()).await.unwrap();
        // Retry-After: 0 overrides the computed 10ms.
        assert_eq!(
            recorder.delays(),
            vec![Duration::ZERO, Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn test_non_retryable_fails_without_retry() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "message": "Invalid filter",
                "errors": {"page": ["must be positive"]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut observer = MockExecutorObserver::new();
        observer
            .expect_on_event()
            .withf(|event| matches!(event, ExecutorEvent::Retrying { .. }))
            .times(0);
        observer
            .expect_on_event()
            .withf(|event| {
                matches!(
                    event,
                    ExecutorEvent::Terminal {
                        error: Error::Validation { status: 422, .. },
                        ..
                    }
                )
            })
            .times(1)
            .return_const(());

        let err = executor(&server, fast_retries(3), 10)
            .with_observer(Arc::new(observer))
            .execute(&list_networks())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("Invalid filter"));
    }

    #[tokio::test]
    async fn test_not_found_is_terminal() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let descriptor = RequestDescriptor::new(
            Method::GET,
            ResourceKind::Network,
            ApiVersion::V1_1_0,
            "networks/missing",
        );
        let err = executor(&server, fast_retries(3), 10)
            .execute(&descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let err = executor(&server, fast_retries(3), 10)
            .execute(&list_networks())
            .await
            .unwrap_err();
        assert!(err.requires_reauth());
        assert_eq!(err.status_code(), Some(401));
    }

    #[tokio::test]
    async fn test_unauthorized_then_success_after_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "stale",
                "expires_in": 3600
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_token(&server, "fresh").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let executor = executor(&server, fast_retries(3), 10);
        executor.execute(&list_networks()).await.unwrap();
        assert_eq!(
            executor.tokens().cached().unwrap().access_token(),
            "fresh"
        );
    }

    #[tokio::test]
    async fn test_forbidden_does_not_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = executor(&server, fast_retries(3), 10)
            .execute(&list_networks())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "AUTHENTICATION_ERROR");
    }

    #[tokio::test]
    async fn test_rejected_credentials_never_reach_the_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_client"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = executor(&server, fast_retries(3), 10)
            .execute(&list_networks())
            .await
            .unwrap_err();
        assert!(err.requires_reauth());
        assert_eq!(err.api_code(), Some("invalid_client"));
    }

    #[tokio::test]
    async fn test_transient_token_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = Arc::new(Recorder::default());
        executor(&server, fast_retries(2), 10)
            .with_observer(recorder.clone())
            .execute(&list_networks())
            .await
            .unwrap();
        assert_eq!(recorder.delays().len(), 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_rejects_without_network() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let recorder = Arc::new(Recorder::default());
        let executor = executor(&server, fast_retries(0), 2).with_observer(recorder.clone());
        for _ in 0..2 {
            let err = executor.execute(&list_networks()).await.unwrap_err();
            assert_eq!(err.status_code(), Some(503));
        }
        assert_eq!(
            executor.circuit_state(ResourceKind::Network),
            Some(CircuitState::Open)
        );

        let err = executor.execute(&list_networks()).await.unwrap_err();
        assert!(matches!(
            &err,
            Error::ServiceUnavailable { endpoint_group, request_id: Some(_) }
                if endpoint_group == "networks"
        ));
        assert!(recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ExecutorEvent::CircuitRejected { .. })));

        // Other endpoint groups are unaffected.
        assert_eq!(
            executor.circuit_state(ResourceKind::User),
            Some(CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn test_circuit_opening_mid_call_is_terminal() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let err = executor(&server, fast_retries(5), 2)
            .execute(&list_networks())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_post_is_not_retried_after_server_error() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let descriptor =
            RequestDescriptor::new(Method::POST, ResourceKind::Network, ApiVersion::V1_1_0, "networks")
                .with_body(json!({"name": "office"}));
        let err = executor(&server, fast_retries(3), 10)
            .execute(&descriptor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Server {
                is_transient: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_post_is_retried_after_rate_limit() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "n1"})))
            .expect(1)
            .mount(&server)
            .await;

        let descriptor =
            RequestDescriptor::new(Method::POST, ResourceKind::Network, ApiVersion::V1_1_0, "networks")
                .with_body(json!({"name": "office"}));
        let response = executor(&server, fast_retries(3), 10)
            .execute(&descriptor)
            .await
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_read_timeout_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "n1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = Arc::new(Recorder::default());
        let response = executor(&server, fast_retries(3), 10)
            .with_read_timeout(Duration::from_millis(100))
            .with_observer(recorder.clone())
            .execute(&list_networks())
            .await
            .unwrap();

        assert_eq!(response.json::<serde_json::Value>().unwrap()[0]["id"], "n1");
        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ExecutorEvent::Retrying {
                attempt: 0,
                classification: ErrorClassification::Network { in_flight: true },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_post_is_not_retried_after_read_timeout() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "n1"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let recorder = Arc::new(Recorder::default());
        let descriptor =
            RequestDescriptor::new(Method::POST, ResourceKind::Network, ApiVersion::V1_1_0, "networks")
                .with_body(json!({"name": "office"}));
        let err = executor(&server, fast_retries(3), 10)
            .with_read_timeout(Duration::from_millis(100))
            .with_observer(recorder.clone())
            .execute(&descriptor)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network { timeout: true, .. }));
        assert!(recorder.delays().is_empty());
    }

    #[tokio::test]
    async fn test_post_is_retried_after_connect_failure() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;

        // Nothing listens on the API host, so no request can reach a backend.
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let api_url = Url::parse(&format!("http://{}", closed.local_addr().unwrap())).unwrap();
        drop(closed);

        let http = reqwest::Client::new();
        let token_url = Url::parse(&format!("{}/oauth/token", server.uri())).unwrap();
        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            token_url,
            "client",
            SecretString::from("secret".to_string()),
        ));
        let breakers = Arc::new(CircuitBreakers::new(CircuitBreakerConfig::new(
            10,
            Duration::from_secs(60),
        )));
        let recorder = Arc::new(Recorder::default());
        let descriptor =
            RequestDescriptor::new(Method::POST, ResourceKind::Network, ApiVersion::V1_1_0, "networks")
                .with_body(json!({"name": "office"}));
        let err = RequestExecutor::new(http, api_url, tokens, breakers)
            .with_retry_policy(fast_retries(2))
            .with_observer(recorder.clone())
            .execute(&descriptor)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network { timeout: false, .. }));
        assert_eq!(recorder.delays().len(), 2);
    }

    #[tokio::test]
    async fn test_terminal_error_carries_the_sent_request_id() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "bad page"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/users"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let recorder = Arc::new(Recorder::default());
        let executor = executor(&server, fast_retries(1), 10).with_observer(recorder.clone());
        let users =
            RequestDescriptor::new(Method::GET, ResourceKind::User, ApiVersion::V1_1_0, "users");
        for (descriptor, status) in [(list_networks(), 422), (users, 503)] {
            let err = executor.execute(&descriptor).await.unwrap_err();
            assert_eq!(err.status_code(), Some(status));

            let sent: Vec<String> = server
                .received_requests()
                .await
                .unwrap()
                .iter()
                .filter(|request| request.url.path() == format!("/{}", descriptor.versioned_path()))
                .filter_map(|request| request.headers.get(REQUEST_ID_HEADER))
                .map(|value| value.to_str().unwrap().to_string())
                .collect();
            assert!(!sent.is_empty());
            // Retries reuse the logical call's id.
            assert!(sent.iter().all(|id| id == &sent[0]));

            let request_id = err.request_id().map(str::to_string);
            assert_eq!(request_id.as_deref(), Some(sent[0].as_str()));
            assert!(recorder.events.lock().unwrap().iter().any(|event| matches!(
                event,
                ExecutorEvent::Terminal { request_id: id, error, .. }
                    if Some(id.as_str()) == request_id.as_deref()
                        && error.request_id() == request_id.as_deref()
            )));
            assert_eq!(err.into_error_response().request_id, request_id);
        }
    }

    #[tokio::test]
    async fn test_deadline_aborts_the_call() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = executor(&server, fast_retries(3), 10)
            .execute(&list_networks().with_deadline(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network { timeout: true, .. }));
        assert_eq!(err.error_code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn test_deadline_covers_backoff_sleep() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1.0/networks"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let slow = RetryPolicy::new()
            .with_max_retries(3)
            .with_backoff_factor(Duration::from_secs(10))
            .with_jitter(false);
        let started = std::time::Instant::now();
        let err = executor(&server, slow, 10)
            .with_deadline(Duration::from_millis(200))
            .execute(&list_networks())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TIMEOUT");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = with_trailing_slash(Url::parse("https://acme.example.com/prefix").unwrap());
        assert_eq!(
            url.join("api/v1.0/users").unwrap().as_str(),
            "https://acme.example.com/prefix/api/v1.0/users"
        );
    }
}
